//! `NAME=value` assignment parsing, shared by variable declarations, service
//! environment lists, inline deployment overrides, and dotenv-style files.

use crate::document::DescriptorError;
use std::fs;
use std::path::Path;

/// A parsed `NAME` or `NAME=value` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: Option<String>,
}

fn invalid(input: &str, reason: &str) -> DescriptorError {
    DescriptorError::InvalidAssignment {
        input: input.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Parse `NAME`, `NAME=value`, `NAME="value"` or `NAME='value'`.
///
/// Whitespace around the name and value is trimmed. An unquoted value must
/// not contain `=`.
pub fn parse_assignment(input: &str) -> Result<Assignment, DescriptorError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "empty declaration"));
    }

    let Some((name, value)) = trimmed.split_once('=') else {
        return Ok(Assignment {
            name: trimmed.to_owned(),
            value: None,
        });
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(invalid(input, "empty name"));
    }
    let value = value.trim();

    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return Ok(Assignment {
            name: name.to_owned(),
            value: Some(value[1..value.len() - 1].to_owned()),
        });
    }
    if value.starts_with(['"', '\'']) {
        return Err(invalid(input, "unterminated quoted value"));
    }
    if value.contains('=') {
        return Err(invalid(input, "unquoted '=' in value, use quotes"));
    }

    Ok(Assignment {
        name: name.to_owned(),
        value: Some(value.to_owned()),
    })
}

/// Parse an assignment that must carry a value.
pub fn parse_binding(input: &str) -> Result<(String, String), DescriptorError> {
    let assignment = parse_assignment(input)?;
    match assignment.value {
        Some(value) => Ok((assignment.name, value)),
        None => Err(invalid(input, "missing value")),
    }
}

/// Parse dotenv-style content: one `NAME=value` per line, `#` comments and
/// blank lines ignored.
pub fn parse_env_content(content: &str) -> Result<Vec<(String, String)>, DescriptorError> {
    let mut vars = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let binding = parse_binding(trimmed).map_err(|e| DescriptorError::EnvFile {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        vars.push(binding);
    }
    Ok(vars)
}

pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>, DescriptorError> {
    let content = fs::read_to_string(path).map_err(|e| DescriptorError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_env_content(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn assignment(name: &str, value: Option<&str>) -> Assignment {
        Assignment {
            name: name.to_owned(),
            value: value.map(str::to_owned),
        }
    }

    #[test]
    fn parses_plain_and_quoted_values() {
        assert_eq!(parse_assignment("FOO=bar").unwrap(), assignment("FOO", Some("bar")));
        assert_eq!(parse_assignment("FOO=\"bar\"").unwrap(), assignment("FOO", Some("bar")));
        assert_eq!(parse_assignment("FOO='bar'").unwrap(), assignment("FOO", Some("bar")));
        assert_eq!(
            parse_assignment("FOO=\"bar=bar\"").unwrap(),
            assignment("FOO", Some("bar=bar"))
        );
        assert_eq!(parse_assignment("FOO").unwrap(), assignment("FOO", None));
        assert_eq!(parse_assignment("FOO=").unwrap(), assignment("FOO", Some("")));
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(
            parse_assignment("  FOO  =  bar  ").unwrap(),
            assignment("FOO", Some("bar"))
        );
    }

    #[test]
    fn rejects_malformed_declarations() {
        assert!(parse_assignment("").is_err());
        assert!(parse_assignment("=").is_err());
        assert!(parse_assignment("FOO=bar=bar").is_err());
        assert!(parse_assignment("FOO=\"bar").is_err());
    }

    #[test]
    fn binding_requires_value() {
        assert_eq!(
            parse_binding("LEVEL=Warning").unwrap(),
            ("LEVEL".to_owned(), "Warning".to_owned())
        );
        assert!(parse_binding("LEVEL").is_err());
    }

    #[test]
    fn loads_env_file_skipping_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "FOO=bar").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "BAZ=\"qux\"").unwrap();

        let vars = load_env_file(file.path()).unwrap();
        assert_eq!(
            vars,
            vec![
                ("FOO".to_owned(), "bar".to_owned()),
                ("BAZ".to_owned(), "qux".to_owned()),
            ]
        );
    }

    #[test]
    fn env_file_error_names_the_line() {
        let err = parse_env_content("A=1\nB\n").unwrap_err();
        match err {
            DescriptorError::EnvFile { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
