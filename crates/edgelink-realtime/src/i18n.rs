//! Message translation.
//!
//! Templates use `{name}` placeholders filled from the error or message
//! parameters. Unknown languages fall back to the default one; a region
//! suffix (`zh-CN`) resolves to its primary language.

use edgelink_types::{error_code, Params, DEFAULT_LANGUAGE};
use std::collections::HashMap;

/// Renders user-facing text in a session's language.
pub trait Translator: Send + Sync {
    /// Render the message template `key`.
    fn translate(&self, lang: &str, key: &str, params: &Params) -> String;

    /// Render the message for an error code.
    fn translate_error_code(&self, lang: &str, code: u32, params: &Params) -> String;

    /// Whether `lang` has its own catalog.
    fn supports(&self, lang: &str) -> bool;
}

/// In-memory message catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    default_language: String,
    messages: HashMap<String, HashMap<String, String>>,
    errors: HashMap<String, HashMap<u32, String>>,
}

impl Catalog {
    /// An empty catalog.
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            messages: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    /// The catalog shipped with the gateway (English and Chinese).
    pub fn builtin() -> Self {
        let mut catalog = Self::new(DEFAULT_LANGUAGE);
        for (lang, messages, errors) in [("en", EN_MESSAGES, EN_ERRORS), ("zh", ZH_MESSAGES, ZH_ERRORS)] {
            for (key, template) in messages {
                catalog.add_message(lang, *key, *template);
            }
            for (code, template) in errors {
                catalog.add_error(lang, *code, *template);
            }
        }
        catalog
    }

    /// Use `lang` as the fallback language.
    pub fn with_default_language(mut self, lang: impl Into<String>) -> Self {
        self.default_language = lang.into();
        self
    }

    /// Register a message template.
    pub fn add_message(&mut self, lang: &str, key: impl Into<String>, template: impl Into<String>) {
        self.messages
            .entry(lang.to_string())
            .or_default()
            .insert(key.into(), template.into());
    }

    /// Register an error template.
    pub fn add_error(&mut self, lang: &str, code: u32, template: impl Into<String>) {
        self.errors
            .entry(lang.to_string())
            .or_default()
            .insert(code, template.into());
    }

    /// Languages with at least one entry.
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self
            .messages
            .keys()
            .chain(self.errors.keys())
            .cloned()
            .collect();
        langs.sort();
        langs.dedup();
        langs
    }

    fn resolve<'a>(&'a self, lang: &'a str) -> Option<&'a str> {
        let known = |l: &str| self.messages.contains_key(l) || self.errors.contains_key(l);
        if known(lang) {
            return Some(lang);
        }
        let primary = lang.split(['-', '_']).next().unwrap_or(lang);
        known(primary).then_some(primary)
    }

    fn candidates<'a>(&'a self, lang: &'a str) -> impl Iterator<Item = &'a str> {
        self.resolve(lang)
            .into_iter()
            .chain(std::iter::once(self.default_language.as_str()))
    }
}

impl Translator for Catalog {
    fn translate(&self, lang: &str, key: &str, params: &Params) -> String {
        self.candidates(lang)
            .find_map(|l| self.messages.get(l).and_then(|m| m.get(key)))
            .map(|template| render(template, params))
            .unwrap_or_else(|| key.to_string())
    }

    fn translate_error_code(&self, lang: &str, code: u32, params: &Params) -> String {
        self.candidates(lang)
            .find_map(|l| self.errors.get(l).and_then(|m| m.get(&code)))
            .map(|template| render(template, params))
            .unwrap_or_else(|| format!("error {}", code))
    }

    fn supports(&self, lang: &str) -> bool {
        self.resolve(lang).is_some()
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are kept verbatim.
pub fn render(template: &str, params: &Params) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find('}') {
            Some(end) => {
                let name = &tail[1..end];
                match params.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

const EN_MESSAGES: &[(&str, &str)] = &[
    ("driver.upgrade.success", "Driver {name} upgraded to {version}"),
    ("driver.status.success", "Driver instance {name} is now {status}"),
    ("driver.delete.success", "Driver instance {name} deleted"),
    ("driver.log.started", "Streaming the log of {name}"),
    ("driver.log.stopped", "Stopped streaming the log of {name}"),
    ("session.language.success", "Display language set to {lang}"),
];

const ZH_MESSAGES: &[(&str, &str)] = &[
    ("driver.upgrade.success", "驱动 {name} 已升级到 {version}"),
    ("driver.status.success", "驱动实例 {name} 当前状态：{status}"),
    ("driver.delete.success", "驱动实例 {name} 已删除"),
    ("driver.log.started", "正在获取 {name} 的日志"),
    ("driver.log.stopped", "已停止获取 {name} 的日志"),
    ("session.language.success", "显示语言已切换为 {lang}"),
];

const EN_ERRORS: &[(u32, &str)] = &[
    (error_code::SUCCESS, "Success"),
    (error_code::SYSTEM_ERROR, "System error, please try again later"),
    (error_code::INVALID_PARAMS, "Invalid parameters: {reason}"),
    (error_code::RECORD_NOT_FOUND, "{name} does not exist"),
    (error_code::LANGUAGE_NOT_SUPPORTED, "Language {lang} is not supported"),
    (error_code::DRIVER_NOT_FOUND, "Driver {name} does not exist"),
    (error_code::DRIVER_UPGRADE_FAILED, "Failed to upgrade driver {name}"),
    (
        error_code::DRIVER_INSTANCE_RUNNING,
        "Driver instance {name} is running, stop it first",
    ),
    (error_code::LOG_TAIL_FAILED, "Failed to read the log of {name}"),
    (error_code::BROKER_CONN_FAIL, "Message broker connection failed"),
];

const ZH_ERRORS: &[(u32, &str)] = &[
    (error_code::SUCCESS, "成功"),
    (error_code::SYSTEM_ERROR, "系统错误，请稍后重试"),
    (error_code::INVALID_PARAMS, "参数错误：{reason}"),
    (error_code::RECORD_NOT_FOUND, "{name} 不存在"),
    (error_code::LANGUAGE_NOT_SUPPORTED, "不支持语言 {lang}"),
    (error_code::DRIVER_NOT_FOUND, "驱动 {name} 不存在"),
    (error_code::DRIVER_UPGRADE_FAILED, "驱动 {name} 升级失败"),
    (error_code::DRIVER_INSTANCE_RUNNING, "驱动实例 {name} 正在运行，请先停止"),
    (error_code::LOG_TAIL_FAILED, "获取 {name} 的日志失败"),
    (error_code::BROKER_CONN_FAIL, "消息代理连接失败"),
];
