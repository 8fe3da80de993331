//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::Cli;

/// Write the completion script for `shell` to `out`.
fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        write_completions(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_bash_completions_mention_binary() {
        let out = script(Shell::Bash);
        assert!(out.contains("_w600flash"));
        assert!(out.contains("--list-ports"));
    }

    #[test]
    fn test_fish_completions_include_options() {
        let out = script(Shell::Fish);
        assert!(out.contains("complete -c w600flash"));
        assert!(out.contains("non-interactive"));
    }

    #[test]
    fn test_zsh_completions_generate() {
        assert!(script(Shell::Zsh).contains("#compdef w600flash"));
    }
}
