use std::collections::HashMap;

/// Fields parsed from a skill file's frontmatter block, a permissive YAML
/// subset: `key: value` lines, `#` comments stripped, quoted values unquoted.
#[derive(Debug, Clone, Default)]
pub struct Frontmatter {
    pub fields: HashMap<String, String>,
}

impl Frontmatter {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("yes"))
    }
}

/// Split a skill file's raw text into (frontmatter, body). The body is the
/// content after the second `---` marker, trimmed. Files with no frontmatter
/// block return an empty `Frontmatter` and the whole text as body.
pub fn parse_frontmatter(text: &str) -> (Frontmatter, String) {
    let trimmed = text.trim_start();
    let Some(after_open) = trimmed.strip_prefix("---") else {
        return (Frontmatter::default(), text.trim().to_string());
    };
    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);

    let Some(close_pos) = find_closing_marker(after_open) else {
        return (Frontmatter::default(), text.trim().to_string());
    };

    let block = &after_open[..close_pos];
    let rest = &after_open[close_pos..];
    let body = rest
        .splitn(2, '\n')
        .nth(1)
        .unwrap_or("")
        .trim()
        .to_string();

    (Frontmatter { fields: parse_yaml_subset(block) }, body)
}

fn find_closing_marker(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed.trim() == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn parse_yaml_subset(block: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for raw_line in block.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = unquote(value.trim());
        if key.is_empty() {
            continue;
        }
        fields.insert(key, value);
    }
    fields
}

/// Strip a `#` comment that isn't inside quotes.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = None;
    for (i, c) in line.char_indices() {
        match (c, in_quotes) {
            ('"', None) => in_quotes = Some('"'),
            ('\'', None) => in_quotes = Some('\''),
            (q, Some(open)) if q == open => in_quotes = None,
            ('#', None) => return &line[..i],
            _ => {}
        }
    }
    line
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_description() {
        let text = "---\nname: deploy\ndescription: ships the thing\n---\nBody content here.";
        let (fm, body) = parse_frontmatter(text);
        assert_eq!(fm.get("name"), Some("deploy"));
        assert_eq!(fm.get("description"), Some("ships the thing"));
        assert_eq!(body, "Body content here.");
    }

    #[test]
    fn strips_comments_and_quotes() {
        let text = "---\nname: \"deploy\" # the deploy skill\n---\nbody";
        let (fm, _) = parse_frontmatter(text);
        assert_eq!(fm.get("name"), Some("deploy"));
    }

    #[test]
    fn missing_frontmatter_returns_whole_text_as_body() {
        let (fm, body) = parse_frontmatter("just a plain file\nwith no markers");
        assert!(fm.fields.is_empty());
        assert_eq!(body, "just a plain file\nwith no markers");
    }

    #[test]
    fn unterminated_frontmatter_falls_back_to_raw_text() {
        let text = "---\nname: deploy\nno closing marker here";
        let (fm, body) = parse_frontmatter(text);
        assert!(fm.fields.is_empty());
        assert_eq!(body, text.trim());
    }

    #[test]
    fn disable_model_invocation_flag_parses() {
        let (fm, _) = parse_frontmatter("---\ndisable-model-invocation: true\n---\n");
        assert!(fm.flag("disable-model-invocation"));
    }
}
