//! 指令路由：归一化、分类与入口路径选择
//!
//! 规则匹配（不调用模型）：激活 / 导航 / 输入 / 完成 / 修改五类动词族归为 GUI 交互，
//! 分析类（what / describe / read ...）归为提问，寒暄归为对话。
//! 只有 GUI 交互且置信度高于阈值的指令走快速路径，其余直接进入慢速路径。

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::config::RouterSection;

/// 指令校验失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("command is empty")]
    Empty,

    #[error("command is too long ({len} > {max} chars)")]
    TooLong { len: usize, max: usize },
}

/// 指令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    GuiInteraction,
    Question,
    Conversational,
    Unknown,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::GuiInteraction => "gui_interaction",
            CommandType::Question => "question",
            CommandType::Conversational => "conversational",
            CommandType::Unknown => "unknown",
        }
    }

    /// 只需回答、不执行界面动作
    pub fn is_informational(&self) -> bool {
        matches!(self, CommandType::Question | CommandType::Conversational)
    }
}

/// 命中的动词族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentFamily {
    Activation,
    Navigation,
    Input,
    Analysis,
    Completion,
    Modification,
    Greeting,
}

/// 校验后的指令；创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    raw: String,
    normalized: String,
    command_type: CommandType,
    intent: Option<IntentFamily>,
    confidence: f32,
    target: Option<String>,
    text: Option<String>,
}

impl Command {
    /// 原始指令文本（慢速路径始终使用它）
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn intent(&self) -> Option<IntentFamily> {
        self.intent
    }

    /// [0, 1]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// 动作目标（如 "sign in button"）
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// 输入类指令要键入的文本
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

struct Rule {
    family: IntentFamily,
    pattern: Regex,
}

fn rule(pattern: &str) -> Regex {
    Regex::new(pattern).expect("router rule must compile")
}

const POLITE: &str = r"^(?:please\s+|can you\s+|could you\s+)?";

pub struct CommandRouter {
    max_chars: usize,
    threshold: f32,
    greeting: Regex,
    analysis: Regex,
    leading_rules: Vec<Rule>,
    embedded_gui: Regex,
    input_text: Regex,
    leading_article: Regex,
}

impl CommandRouter {
    pub fn new(cfg: &RouterSection) -> Self {
        let lead = |verbs: &str| rule(&format!(r"{POLITE}(?P<verb>{verbs})\b\s*(?P<rest>.*)$"));
        Self {
            max_chars: cfg.max_command_chars,
            threshold: cfg.gui_confidence_threshold,
            greeting: rule(
                r"^(?:hi|hello|hey|thanks|thank you|good morning|good evening|good night|how are you|bye|goodbye)\b",
            ),
            analysis: rule(
                r"^(?:what|what's|whats|who|where|when|why|how|which|is|are|does|do|tell me|describe|read|explain|summarize)\b",
            ),
            leading_rules: vec![
                Rule {
                    family: IntentFamily::Activation,
                    pattern: lead(r"click|double click|right click|press|tap|hit|select|choose|activate|open|launch|switch to|focus"),
                },
                Rule {
                    family: IntentFamily::Navigation,
                    pattern: lead(r"go to|go back|go forward|navigate to|navigate|scroll|close|minimize|maximize"),
                },
                Rule {
                    family: IntentFamily::Input,
                    pattern: lead(r"type|enter|fill in|fill|write|input|search for"),
                },
                Rule {
                    family: IntentFamily::Completion,
                    pattern: lead(r"submit|confirm|send|save|finish|accept|done"),
                },
                Rule {
                    family: IntentFamily::Modification,
                    pattern: lead(r"delete|remove|rename|change|edit|clear|copy|paste|undo|redo"),
                },
            ],
            embedded_gui: rule(r"\b(?:click|press|tap|type|scroll|open|select|submit)\b"),
            input_text: rule(
                r"^(?P<text>.+?)(?:\s+(?:in|into|on)\s+(?:the\s+)?(?P<field>.+))?$",
            ),
            leading_article: rule(r"^(?:on\s+)?(?:the|a|an)\s+"),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 小写、去首尾空白、合并连续空白、去掉结尾的句号 / 叹号
    pub fn normalize(raw: &str) -> String {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed
            .to_lowercase()
            .trim_end_matches(['.', '!'])
            .trim_end()
            .to_string()
    }

    /// 校验并分类；仅空指令或超长指令返回错误
    pub fn classify(&self, raw: &str) -> Result<Command, RouterError> {
        let len = raw.chars().count();
        if len > self.max_chars {
            return Err(RouterError::TooLong {
                len,
                max: self.max_chars,
            });
        }
        let normalized = Self::normalize(raw);
        if normalized.is_empty() {
            return Err(RouterError::Empty);
        }

        let mut command = Command {
            raw: raw.to_string(),
            normalized: normalized.clone(),
            command_type: CommandType::Unknown,
            intent: None,
            confidence: 0.2,
            target: None,
            text: None,
        };

        if self.greeting.is_match(&normalized) {
            command.command_type = CommandType::Conversational;
            command.intent = Some(IntentFamily::Greeting);
            command.confidence = 0.9;
            return Ok(command);
        }

        if self.analysis.is_match(&normalized) {
            command.command_type = CommandType::Question;
            command.intent = Some(IntentFamily::Analysis);
            command.confidence = if normalized.ends_with('?') { 0.95 } else { 0.85 };
            return Ok(command);
        }

        for r in &self.leading_rules {
            let Some(caps) = r.pattern.captures(&normalized) else {
                continue;
            };
            let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");
            command.command_type = CommandType::GuiInteraction;
            command.intent = Some(r.family);
            // 动词 + 目标比单独一个动词更确定
            command.confidence = if rest.is_empty() { 0.75 } else { 0.9 };
            if r.family == IntentFamily::Input && !rest.is_empty() {
                self.split_input(rest, &mut command);
            } else if !rest.is_empty() {
                command.target = Some(self.strip_article(rest));
            }
            return Ok(command);
        }

        if normalized.ends_with('?') {
            command.command_type = CommandType::Question;
            command.intent = Some(IntentFamily::Analysis);
            command.confidence = 0.7;
            return Ok(command);
        }

        if self.embedded_gui.is_match(&normalized) {
            command.command_type = CommandType::GuiInteraction;
            command.confidence = 0.5;
            return Ok(command);
        }

        Ok(command)
    }

    fn split_input(&self, rest: &str, command: &mut Command) {
        match self.input_text.captures(rest) {
            Some(caps) => {
                command.text = caps
                    .name("text")
                    .map(|m| m.as_str().trim_matches('"').to_string());
                command.target = caps.name("field").map(|m| self.strip_article(m.as_str()));
            }
            None => command.text = Some(rest.to_string()),
        }
    }

    fn strip_article(&self, s: &str) -> String {
        self.leading_article.replace(s, "").trim().to_string()
    }

    /// GUI 交互且置信度高于阈值 → 快速路径
    pub fn is_gui_command(&self, command: &Command) -> bool {
        command.command_type == CommandType::GuiInteraction && command.confidence > self.threshold
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(&RouterSection::default())
    }
}
