//! Alternate editor handoff

use crate::config::SessionConfig;
use crate::error::ClientError;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Split an editor command on spaces. A token opened by `"` runs to the
/// next `"`, so `"/opt/my editor/bin/ed" -n` is two tokens.
pub fn tokenize_editor(editor: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = editor;

    while !rest.is_empty() {
        let trimmed = rest.trim_start_matches([' ', '"']);
        let skipped = &rest[..rest.len() - trimmed.len()];
        let sep = if skipped.ends_with('"') { '"' } else { ' ' };

        let (token, next) = match trimmed.find(sep) {
            Some(end) => (&trimmed[..end], &trimmed[end + 1..]),
            None => (trimmed, ""),
        };
        if !token.is_empty() {
            tokens.push(token.to_string());
        }
        rest = next;
    }
    tokens
}

/// Replace this process with the alternate editor, passing the items on.
/// Only returns if the editor could not be started.
pub fn exec_alternate(config: &SessionConfig) -> ClientError {
    let editor = config.alternate_editor.clone().unwrap_or_default();
    let mut tokens = tokenize_editor(&editor).into_iter();

    let Some(program) = tokens.next() else {
        return ClientError::AlternateEditor {
            editor,
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        };
    };
    tracing::debug!(%program, "executing alternate editor");

    let source = Command::new(program).args(tokens).args(&config.items).exec();
    ClientError::AlternateEditor { editor, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words() {
        assert_eq!(tokenize_editor("vi"), vec!["vi"]);
        assert_eq!(tokenize_editor("emacs -nw  -Q "), vec!["emacs", "-nw", "-Q"]);
    }

    #[test]
    fn test_quoted_program() {
        assert_eq!(
            tokenize_editor("\"/opt/my editor/ed\" -n"),
            vec!["/opt/my editor/ed", "-n"]
        );
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        assert_eq!(tokenize_editor("ed \"a b"), vec!["ed", "a b"]);
    }

    #[test]
    fn test_empty() {
        assert!(tokenize_editor("").is_empty());
        assert!(tokenize_editor("   ").is_empty());
    }
}
