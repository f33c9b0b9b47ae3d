// ABOUTME: POSIX shell quoting helpers
// ABOUTME: Builds sh -c scripts and readable command lines from untrusted arguments

/// Wrap a value in single quotes so `sh` treats it as one literal word
pub fn shell_escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Escape and space-join arguments
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_escape(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable command line; plain words stay unquoted
pub fn display_command(command: &str, args: &[String]) -> String {
    std::iter::once(command.to_string())
        .chain(args.iter().map(|arg| display_word(arg)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_word(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        word.to_string()
    } else {
        shell_escape(word)
    }
}

/// Environment variable names the shell will accept in `export`
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
