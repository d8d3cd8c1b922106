//! Language variants and their compile/run configuration

use std::collections::HashMap;
use std::fmt;

use anyhow::Context;
use serde::Deserialize;

/// Every language the pipeline accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    C,
    Cpp,
    Java,
    Html,
    React,
    Vue,
}

/// How a language is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageKind {
    /// Interpreter runs the source directly
    Interpreted,
    /// Compiler produces an executable first
    Compiled,
    /// Rendered by the browser, nothing is executed on the host
    Markup,
    /// Multi-file project served by a dev server inside a container
    Project,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::Python,
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Html,
        Language::React,
        Language::Vue,
    ];

    /// Parse a caller-supplied language tag (case-insensitive, with aliases)
    pub fn from_tag(tag: &str) -> Option<Self> {
        let language = match tag.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Language::Python,
            "c" => Language::C,
            "cpp" | "c++" | "cxx" => Language::Cpp,
            "java" => Language::Java,
            "html" | "web" => Language::Html,
            "react" | "jsx" => Language::React,
            "vue" => Language::Vue,
            _ => return None,
        };
        Some(language)
    }

    /// Canonical name, also the key in `languages.toml`
    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Html => "html",
            Language::React => "react",
            Language::Vue => "vue",
        }
    }

    pub fn kind(self) -> LanguageKind {
        match self {
            Language::Python => LanguageKind::Interpreted,
            Language::C | Language::Cpp | Language::Java => LanguageKind::Compiled,
            Language::Html => LanguageKind::Markup,
            Language::React | Language::Vue => LanguageKind::Project,
        }
    }

    pub fn is_project(self) -> bool {
        self.kind() == LanguageKind::Project
    }

    /// Languages whose output is produced by running a process
    pub fn is_runnable(self) -> bool {
        matches!(
            self.kind(),
            LanguageKind::Interpreted | LanguageKind::Compiled
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Placeholder substituted with the entry-point name
pub const ENTRY_PLACEHOLDER: &str = "{entry}";

/// Configuration for a runnable language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Name of the source file (e.g., "main.cpp"), may contain `{entry}`
    pub source_file: String,
    /// Compile command template (None if not needed)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Whether RLIMIT_AS may be applied to the process
    pub limit_address_space: bool,
    /// Whether RLIMIT_NPROC may be applied; threads count as processes
    pub limit_processes: bool,
    /// Memory limit multiplier and bonus: (multiplier, bonus_mb)
    /// actual_memory = base_memory * multiplier + bonus
    pub memory_limit: Option<(u32, u32)>,
}

impl LanguageConfig {
    /// Calculate actual memory limit based on base memory limit
    pub fn calculate_memory_limit(&self, base_memory_mb: u32) -> u32 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => base_memory_mb * multiplier + bonus_mb,
            None => base_memory_mb,
        }
    }

    /// Substitute the entry-point name into file name and commands
    pub fn resolve(&self, entry: &str) -> ResolvedCommands {
        let fill = |s: &String| s.replace(ENTRY_PLACEHOLDER, entry);
        ResolvedCommands {
            source_file: fill(&self.source_file),
            compile_command: self
                .compile_command
                .as_ref()
                .map(|cmd| cmd.iter().map(fill).collect()),
            run_command: self.run_command.iter().map(fill).collect(),
        }
    }
}

/// Commands with placeholders filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommands {
    pub source_file: String,
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default = "default_true")]
    limit_address_space: bool,
    #[serde(default = "default_true")]
    limit_processes: bool,
    #[serde(default)]
    memory_limit: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Compile/run table for every runnable language
#[derive(Debug, Clone)]
pub struct LanguageTable {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageTable {
    /// Load the table shipped with the crate
    pub fn embedded() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> =
            toml::from_str(content).context("Invalid language table")?;

        let mut configs = HashMap::new();

        for (name, raw) in raw_configs {
            let language = Language::from_tag(&name)
                .ok_or_else(|| anyhow::anyhow!("Unknown language in table: {}", name))?;
            if !language.is_runnable() {
                anyhow::bail!("Language {} is not executed by a runner", language);
            }

            let memory_limit = parse_limit(&raw.memory_limit)
                .with_context(|| format!("Invalid memory limit for {}", name))?;

            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }

            configs.insert(
                language,
                LanguageConfig {
                    source_file: raw.source_file,
                    compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
                    run_command,
                    limit_address_space: raw.limit_address_space,
                    limit_processes: raw.limit_processes,
                    memory_limit,
                },
            );
        }

        Ok(Self { configs })
    }

    pub fn get(&self, language: Language) -> Option<&LanguageConfig> {
        self.configs.get(&language)
    }

    /// Get all configured language names
    pub fn supported_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort_by_key(|l| l.name());
        languages
    }
}

fn parse_limit(raw_limit: &[String]) -> anyhow::Result<Option<(u32, u32)>> {
    if raw_limit.is_empty() {
        return Ok(None);
    }
    if raw_limit.len() != 2 {
        anyhow::bail!("expected [multiplier, bonus], got {:?}", raw_limit);
    }
    let multiplier = raw_limit[0]
        .parse::<u32>()
        .with_context(|| format!("bad multiplier {}", raw_limit[0]))?;
    let bonus = raw_limit[1]
        .parse::<u32>()
        .with_context(|| format!("bad bonus {}", raw_limit[1]))?;
    Ok(Some((multiplier, bonus)))
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_table_covers_runnable_languages() {
        let table = LanguageTable::embedded().unwrap();
        for language in Language::ALL {
            assert_eq!(
                table.get(language).is_some(),
                language.is_runnable(),
                "{}",
                language
            );
        }
        let java = table.get(Language::Java).unwrap();
        assert!(!java.limit_address_space && !java.limit_processes);
        assert!(table.get(Language::C).unwrap().limit_processes);
    }

    #[test]
    fn test_tags_and_aliases() {
        assert_eq!(Language::from_tag("Python3"), Some(Language::Python));
        assert_eq!(Language::from_tag(" c++ "), Some(Language::Cpp));
        assert_eq!(Language::from_tag("jsx"), Some(Language::React));
        assert_eq!(Language::from_tag("cobol"), None);
        assert!(Language::Vue.is_project());
        assert_eq!(Language::Html.kind(), LanguageKind::Markup);
    }

    #[test]
    fn test_java_entry_substitution() {
        let table = LanguageTable::embedded().unwrap();
        let resolved = table.get(Language::Java).unwrap().resolve("Solution");

        assert_eq!(resolved.source_file, "Solution.java");
        assert!(resolved
            .compile_command
            .unwrap()
            .contains(&"Solution.java".to_string()));
        assert_eq!(resolved.run_command.last().unwrap(), "Solution");
    }

    #[test]
    fn test_memory_limit_adjustment() {
        let table = LanguageTable::from_toml_str(
            r#"
[python]
source_file = "main.py"
run_command = "python3 main.py"
memory_limit = ["2", "32"]
"#,
        )
        .unwrap();

        let python = table.get(Language::Python).unwrap();
        assert_eq!(python.calculate_memory_limit(256), 544);
        assert!(python.limit_address_space);
        assert!(python.compile_command.is_none());
    }

    #[test]
    fn test_rejects_non_runnable_entry() {
        let result = LanguageTable::from_toml_str(
            r#"
[html]
source_file = "index.html"
run_command = "cat index.html"
"#,
        );
        assert!(result.is_err());
    }
}
