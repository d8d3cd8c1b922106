//! Raw-text deny rules, one table per language family

use anyhow::Context;
use regex::{Regex, RegexBuilder};

/// A compiled deny pattern with the label reported on a match
#[derive(Debug)]
pub struct DenyRule {
    pub label: &'static str,
    regex: Regex,
}

impl DenyRule {
    fn new(label: &'static str, pattern: &str) -> anyhow::Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(false)
            .build()
            .with_context(|| format!("Invalid deny pattern for {}", label))?;
        Ok(Self { label, regex })
    }

    fn new_ci(label: &'static str, pattern: &str) -> anyhow::Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid deny pattern for {}", label))?;
        Ok(Self { label, regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// First rule in `rules` matching `text`
pub fn first_match<'a>(rules: &'a [DenyRule], text: &str) -> Option<&'a DenyRule> {
    rules.iter().find(|rule| rule.is_match(text))
}

/// Indirect capability use that survives aliasing in Python
pub fn python_rules() -> anyhow::Result<Vec<DenyRule>> {
    Ok(vec![
        DenyRule::new("os.system", r"\bos\s*\.\s*system\b")?,
        DenyRule::new("subprocess", r"\bsubprocess\s*\.")?,
        DenyRule::new("popen", r"\.\s*popen\s*\(")?,
        DenyRule::new("check_output", r"\.\s*check_output\b")?,
        DenyRule::new("socket", r"\bsocket\s*\.")?,
        DenyRule::new("urllib", r"\burllib\b")?,
        DenyRule::new(
            "requests",
            r"\brequests\s*\.\s*(get|post|put|patch|delete|head|options|request|Session)\b",
        )?,
        DenyRule::new("http.client", r"\bhttp\s*\.\s*client\b")?,
        DenyRule::new("ftplib", r"\bftplib\b")?,
        DenyRule::new("smtplib", r"\bsmtplib\b")?,
        DenyRule::new("__import__", r"__import__")?,
        DenyRule::new("importlib", r"\bimportlib\b")?,
    ])
}

/// Exfiltration and forced navigation in browser-rendered markup
pub fn markup_rules() -> anyhow::Result<Vec<DenyRule>> {
    Ok(vec![
        DenyRule::new_ci(
            "external script",
            r#"<script[^>]*\bsrc\s*=\s*["']?\s*(https?:)?//"#,
        )?,
        DenyRule::new_ci("external fetch", r#"\bfetch\s*\(\s*["'`]\s*(https?:)?//"#)?,
        DenyRule::new_ci("XMLHttpRequest", r"\bXMLHttpRequest\b")?,
        DenyRule::new_ci("sendBeacon", r"\bsendBeacon\s*\(")?,
        DenyRule::new_ci("WebSocket", r"\bnew\s+WebSocket\s*\(")?,
        DenyRule::new_ci("cookie write", r"document\s*\.\s*cookie\s*=[^=]")?,
        // Browser globals that own a navigable location
        DenyRule::new_ci(
            "forced redirect",
            r"\b(window|document|top|self|parent)\s*\.\s*location\s*(\.\s*href\s*)?=[^=]",
        )?,
        DenyRule::new_ci(
            "forced redirect",
            r"\b(window|document|top|self|parent)\s*\.\s*location\s*\.\s*(assign|replace)\s*\(",
        )?,
        // Bare global `location`; declarations and member accesses are not navigation
        DenyRule::new_ci(
            "forced redirect",
            r"(?m)(^|[^\w$.])location\s*\.\s*(href\s*=[^=]|assign\s*\(|replace\s*\()",
        )?,
        DenyRule::new_ci(
            "forced redirect",
            r"(?m)(^|[;{}()>])\s*location\s*=[^=]",
        )?,
        DenyRule::new_ci("window.open", r"\bwindow\s*\.\s*open\s*\(")?,
        DenyRule::new_ci(
            "meta refresh",
            r#"<meta[^>]*http-equiv\s*=\s*["']?\s*refresh"#,
        )?,
        DenyRule::new_ci(
            "external embed",
            r#"<(iframe|frame|embed|object)[^>]*\b(src|data)\s*=\s*["']?\s*(https?:)?//"#,
        )?,
        DenyRule::new_ci(
            "javascript: URI",
            r#"\b(href|src|action|formaction)\s*=\s*["']?\s*javascript:"#,
        )?,
        DenyRule::new_ci("base64 HTML data URI", r"data:text/html;base64")?,
    ])
}

/// Process spawning and networking in C and C++
pub fn native_rules() -> anyhow::Result<Vec<DenyRule>> {
    Ok(vec![
        DenyRule::new("system", r"\bsystem\s*\(")?,
        DenyRule::new("popen", r"\bpopen\s*\(")?,
        DenyRule::new("fork", r"\b(v?fork|clone)\s*\(")?,
        DenyRule::new("exec", r"\bexec(l|lp|le|v|vp|vpe|ve)\s*\(")?,
        DenyRule::new(
            "socket headers",
            r"#\s*include\s*<\s*(sys/socket\.h|netinet/[a-z_]+\.h|arpa/inet\.h|netdb\.h|winsock2?\.h)\s*>",
        )?,
    ])
}

pub fn java_rules() -> anyhow::Result<Vec<DenyRule>> {
    Ok(vec![
        DenyRule::new("Runtime.exec", r"\bRuntime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*exec\b")?,
        DenyRule::new("ProcessBuilder", r"\bProcessBuilder\b")?,
        DenyRule::new("java.net", r"\bjava\s*\.\s*net\b")?,
        DenyRule::new("System.exit", r"\bSystem\s*\.\s*exit\s*\(")?,
        DenyRule::new("reflection", r"\bjava\s*\.\s*lang\s*\.\s*reflect\b")?,
    ])
}
