use crate::core::diff::{ChangeEvent, ChangeKind};
use crate::core::scope::{ProgramData, ScopeElement};

/// One column of the line printed per scope element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputField {
    Target,
    Description,
    Category,
    Url,
    Bounty,
}

impl OutputField {
    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            't' => Some(OutputField::Target),
            'd' => Some(OutputField::Description),
            'c' => Some(OutputField::Category),
            'u' => Some(OutputField::Url),
            'b' => Some(OutputField::Bounty),
            _ => None,
        }
    }
}

/// Field selection and delimiter for streamed program output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub fields: Vec<OutputField>,
    pub delimiter: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            fields: vec![OutputField::Target, OutputField::Url],
            delimiter: " ".to_string(),
        }
    }
}

impl OutputFormat {
    /// Parses a field selection such as `"tdcu"`.
    pub fn parse(fields: &str, delimiter: &str) -> Result<Self, String> {
        let fields = fields
            .chars()
            .map(|c| OutputField::from_letter(c).ok_or_else(|| format!("unknown output field '{}' (use t, d, c, u, b)", c)))
            .collect::<Result<Vec<_>, _>>()?;

        if fields.is_empty() {
            return Err("at least one output field is required".to_string());
        }
        Ok(Self {
            fields,
            delimiter: delimiter.to_string(),
        })
    }

    fn format_element(&self, program: &ProgramData, element: &ScopeElement) -> String {
        self.fields
            .iter()
            .map(|field| match field {
                OutputField::Target => element.target.clone(),
                OutputField::Description => element.description.replace(['\n', '\r'], " "),
                OutputField::Category => element.unified_category().to_string(),
                OutputField::Url => program.url.clone(),
                OutputField::Bounty => (if element.is_bbp { "bbp" } else { "vdp" }).to_string(),
            })
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }

    /// One line per real scope element; out-of-scope lines are prefixed with `[oos]`.
    pub fn format_program(&self, program: &ProgramData) -> Vec<String> {
        let in_scope = program
            .in_scope
            .iter()
            .filter(|e| !e.is_no_scope_table())
            .map(|e| self.format_element(program, e));

        let out_of_scope = program
            .out_of_scope
            .iter()
            .filter(|e| !e.is_no_scope_table())
            .map(|e| format!("[oos]{}{}", self.delimiter, self.format_element(program, e)));

        in_scope.chain(out_of_scope).collect()
    }
}

/// Single-line rendering of a change event.
pub fn format_change(event: &ChangeEvent) -> String {
    let marker = match event.kind {
        ChangeKind::Added => "+",
        ChangeKind::Removed => "-",
        ChangeKind::Updated => "~",
        ChangeKind::ProgramRemoved => "x",
    };
    let table = if event.in_scope { "" } else { " [oos]" };

    match event.kind {
        ChangeKind::ProgramRemoved => format!("{} {} {} (program removed)", marker, event.platform, event.program_url),
        _ => format!("{} {} {} {}{}", marker, event.platform, event.program_url, event.target, table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Platform;

    fn program() -> ProgramData {
        ProgramData {
            url: "https://hackerone.com/acme".to_string(),
            in_scope: vec![
                ScopeElement::new("*.acme.com", "URL").with_description("main\nsite").bounty(true),
                ScopeElement::no_scope_table(),
            ],
            out_of_scope: vec![ScopeElement::new("blog.acme.com", "URL")],
        }
    }

    #[test]
    fn test_default_format() {
        let lines = OutputFormat::default().format_program(&program());
        assert_eq!(
            lines,
            vec![
                "*.acme.com https://hackerone.com/acme",
                "[oos] blog.acme.com https://hackerone.com/acme",
            ]
        );
    }

    #[test]
    fn test_custom_fields_and_delimiter() {
        let format = OutputFormat::parse("tcdb", ",").unwrap();
        let lines = format.format_program(&program());
        assert_eq!(lines[0], "*.acme.com,wildcard,main site,bbp");
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        assert!(OutputFormat::parse("tx", " ").is_err());
        assert!(OutputFormat::parse("", " ").is_err());
    }

    #[test]
    fn test_format_change() {
        let event = ChangeEvent {
            kind: ChangeKind::Added,
            platform: Platform::HackerOne,
            program_url: "https://hackerone.com/acme".to_string(),
            target: "new.acme.com".to_string(),
            in_scope: true,
            old_value: None,
            new_value: Some(ScopeElement::new("new.acme.com", "URL")),
        };
        assert_eq!(format_change(&event), "+ hackerone https://hackerone.com/acme new.acme.com");

        let removed = ChangeEvent { kind: ChangeKind::ProgramRemoved, target: String::new(), ..event };
        assert_eq!(format_change(&removed), "x hackerone https://hackerone.com/acme (program removed)");
    }
}
