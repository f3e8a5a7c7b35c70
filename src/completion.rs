//! # Shell Completion Module
//!
//! Completion scripts come from `clap_complete`. The hidden `complete-songs`
//! command lists song ids from the stored graph for shells that call back into the
//! binary.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! songrank completion bash > ~/.local/share/bash-completion/completions/songrank
//!
//! # Generate zsh completions
//! songrank completion zsh > ~/.config/zsh/completions/_songrank
//! ```

use crate::graph::SongGraph;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;

/// Most ids offered at once.
const MAX_SONG_COMPLETIONS: usize = 200;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to `clap_complete`'s Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Song ids starting with `prefix`, sorted, at most [`MAX_SONG_COMPLETIONS`].
#[must_use]
pub fn song_completions(graph: &SongGraph, prefix: &str) -> Vec<String> {
    let mut ids: Vec<String> = graph
        .iter()
        .map(|(id, _)| id)
        .filter(|id| id.starts_with(prefix))
        .cloned()
        .collect();
    ids.sort_unstable();
    ids.truncate(MAX_SONG_COMPLETIONS);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::MetadataPatch;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(shell_to_completion_shell(crate::cli::Shell::Bash), CompletionShell::Bash);
        assert_eq!(shell_to_completion_shell(crate::cli::Shell::Zsh), CompletionShell::Zsh);
    }

    #[test]
    fn test_song_completions_filter_by_prefix() {
        let mut graph = SongGraph::new(0.1);
        for id in ["spotify_b", "spotify_a", "youtube_x"] {
            graph.upsert_song(id, &MetadataPatch::default(), 0);
        }
        assert_eq!(song_completions(&graph, "spotify_"), vec!["spotify_a", "spotify_b"]);
        assert_eq!(song_completions(&graph, "").len(), 3);
        assert!(song_completions(&graph, "soundcloud_").is_empty());
    }
}
