//! Static safety validation
//!
//! Sources are checked before anything runs. Python gets a syntax-tree walk
//! followed by a raw-text sweep; compiled languages get a light deny-list;
//! browser-rendered markup only rejects exfiltration and forced navigation.

mod patterns;
mod python;

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::config::RunnerConfig;
use crate::core::utils::{char_len, is_safe_path};
use crate::core::{Language, LanguageKind, ValidationError, ValidationVerdict};

use patterns::DenyRule;

pub use python::{DENIED_ATTRIBUTES, DENIED_CALLS, DENIED_IMPORTS};

pub struct Validator {
    max_source_length: usize,
    max_project_length: usize,
    python_rules: Vec<DenyRule>,
    markup_rules: Vec<DenyRule>,
    native_rules: Vec<DenyRule>,
    java_rules: Vec<DenyRule>,
}

impl Validator {
    pub fn new(config: &RunnerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            max_source_length: config.max_source_length,
            max_project_length: config.max_project_length,
            python_rules: patterns::python_rules()?,
            markup_rules: patterns::markup_rules()?,
            native_rules: patterns::native_rules()?,
            java_rules: patterns::java_rules()?,
        })
    }

    /// Validate a single source
    pub fn validate(&self, source: &str, language: Language) -> Result<(), ValidationError> {
        let len = char_len(source);
        if len > self.max_source_length {
            return Err(ValidationError::TooLarge {
                len,
                max: self.max_source_length,
            });
        }

        match language {
            Language::Python => {
                python::check(source)?;
                self.sweep(&self.python_rules, source)
            }
            Language::C | Language::Cpp => self.sweep(&self.native_rules, source),
            Language::Java => self.sweep(&self.java_rules, source),
            Language::Html | Language::React | Language::Vue => {
                self.sweep(&self.markup_rules, source)
            }
        }
    }

    /// Validate with a caller-supplied language tag
    pub fn validate_tag(&self, source: &str, tag: &str) -> Result<Language, ValidationError> {
        let language = Language::from_tag(tag)
            .ok_or_else(|| ValidationError::UnsupportedLanguage(tag.trim().to_string()))?;
        self.validate(source, language)?;
        Ok(language)
    }

    /// Pre-flight check returning a verdict instead of an error
    pub fn verdict(&self, source: &str, tag: &str) -> ValidationVerdict {
        let verdict: ValidationVerdict = self.validate_tag(source, tag).map(|_| ()).into();
        debug!(tag, allowed = verdict.allowed, "Validated source");
        verdict
    }

    /// Validate every file of a multi-file project
    pub fn validate_project(
        &self,
        files: &BTreeMap<String, String>,
        language: Language,
    ) -> Result<(), ValidationError> {
        if !matches!(language.kind(), LanguageKind::Project | LanguageKind::Markup) {
            return Err(ValidationError::UnsupportedLanguage(format!(
                "{} does not accept project files",
                language
            )));
        }

        let mut total = 0usize;
        for (path, content) in files {
            if !is_safe_path(path) {
                return Err(ValidationError::UnsafePath(path.clone()));
            }
            total += char_len(content);
            if total > self.max_project_length {
                return Err(ValidationError::TooLarge {
                    len: total,
                    max: self.max_project_length,
                });
            }
            self.sweep(&self.markup_rules, content)
                .map_err(|e| match e {
                    ValidationError::CapabilityDenied(label) => {
                        ValidationError::CapabilityDenied(format!("{} in {}", label, path))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }

    fn sweep(&self, rules: &[DenyRule], source: &str) -> Result<(), ValidationError> {
        match patterns::first_match(rules, source) {
            Some(rule) => Err(ValidationError::CapabilityDenied(rule.label.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(&RunnerConfig::default()).unwrap()
    }

    #[test]
    fn test_hello_world_allowed() {
        let verdict = validator().verdict("print(\"hi\")\n", "python");
        assert!(verdict.allowed);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn test_too_large_is_counted_in_chars() {
        let v = validator();
        let source = format!("print('{}')", "가".repeat(4990));
        assert_eq!(v.validate(&source, Language::Python), Ok(()));

        let source = format!("print('{}')", "x".repeat(5000));
        assert!(matches!(
            v.validate(&source, Language::Python),
            Err(ValidationError::TooLarge { max: 5000, .. })
        ));
    }

    #[test]
    fn test_rejections_carry_reason() {
        let v = validator();
        for source in [
            "import os\nos.system('ls')",
            "open('/etc/passwd')",
            "().__class__.__bases__",
            "mod = __import__",
        ] {
            let verdict = v.verdict(source, "python");
            assert!(!verdict.allowed, "{}", source);
            assert!(!verdict.reason.unwrap_or_default().is_empty());
        }
    }

    #[test]
    fn test_sweep_catches_indirection() {
        let v = validator();
        let source = "import math as m\nclient = m\nclient.urllib = 1\n";
        assert_eq!(
            v.validate(source, Language::Python),
            Err(ValidationError::CapabilityDenied("urllib".into()))
        );
    }

    #[test]
    fn test_unknown_tag() {
        let verdict = validator().verdict("IDENTIFICATION DIVISION.", "cobol");
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("cobol"));
    }

    #[test]
    fn test_hostile_samples() {
        let v = validator();
        let samples = [
            (include_str!("../../../test-codes/python_escape.py"), "python"),
            (include_str!("../../../test-codes/python_reflection.py"), "python"),
            (include_str!("../../../test-codes/c_fork_bomb.c"), "c"),
            (include_str!("../../../test-codes/java_process.java"), "java"),
            (include_str!("../../../test-codes/html_exfiltrate.html"), "html"),
        ];
        for (source, tag) in samples {
            let verdict = v.verdict(source, tag);
            assert!(!verdict.allowed, "sample for {} was allowed", tag);
        }
    }

    #[test]
    fn test_compiled_sources_allowed() {
        let v = validator();
        let c = "#include <stdio.h>\nint main(void) { printf(\"hi\\n\"); return 0; }\n";
        assert_eq!(v.validate(c, Language::C), Ok(()));
        let java = "public class Main { public static void main(String[] a) { System.out.println(1); } }";
        assert_eq!(v.validate(java, Language::Java), Ok(()));
    }

    #[test]
    fn test_location_variables_are_not_redirects() {
        let v = validator();
        let mut files = BTreeMap::new();
        files.insert(
            "src/App.jsx".to_string(),
            "import { useLocation } from 'react-router-dom'\n\
export default function App() {\n\
  const location = useLocation();\n\
  return <p>{location.pathname}</p>;\n\
}\n"
                .to_string(),
        );
        assert_eq!(v.validate_project(&files, Language::React), Ok(()));

        let page = "<p id=\"c\"></p><script>let location = 'Paris';\n\
document.getElementById('c').textContent = location;</script>";
        assert_eq!(v.validate(page, Language::Html), Ok(()));
    }

    #[test]
    fn test_project_validation() {
        let v = validator();
        let mut files = BTreeMap::new();
        files.insert(
            "src/App.jsx".to_string(),
            "export default function App() { return <h1>Hi</h1>; }".to_string(),
        );
        assert_eq!(v.validate_project(&files, Language::React), Ok(()));

        files.insert("../outside.js".to_string(), String::new());
        assert_eq!(
            v.validate_project(&files, Language::React),
            Err(ValidationError::UnsafePath("../outside.js".into()))
        );

        let mut files = BTreeMap::new();
        files.insert(
            "src/App.vue".to_string(),
            "<script>window.location = 'https://evil.example'</script>".to_string(),
        );
        assert_eq!(
            v.validate_project(&files, Language::Vue),
            Err(ValidationError::CapabilityDenied(
                "forced redirect in src/App.vue".into()
            ))
        );

        assert!(v.validate_project(&files, Language::Python).is_err());
    }

    #[test]
    fn test_static_site_files_use_markup_rules() {
        let v = validator();
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), "<h1>Shop</h1><script src=\"js/app.js\"></script>".to_string());
        files.insert("js/app.js".to_string(), "document.querySelector('h1').textContent = 'Hi';".to_string());
        assert_eq!(v.validate_project(&files, Language::Html), Ok(()));

        files.insert("js/track.js".to_string(), "navigator.sendBeacon('/t', data);".to_string());
        assert_eq!(
            v.validate_project(&files, Language::Html),
            Err(ValidationError::CapabilityDenied("sendBeacon in js/track.js".into()))
        );
    }
}
