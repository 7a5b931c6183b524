//! Forced prompt-template rendering.
//!
//! The production path lets the backend render with the model's embedded
//! chat template; this engine is only used when a template is forced in
//! the configuration (or by tests that need deterministic prompts).

use drover_core::{Error, ErrorKind, Message, PromptTemplate, Result, Role};

/// Renders a message list into a model-specific prompt string.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    template: PromptTemplate,
    custom_template: Option<String>,
}

impl TemplateEngine {
    pub fn new(template: PromptTemplate, custom_template: Option<String>) -> Self {
        Self {
            template,
            custom_template,
        }
    }

    pub fn template(&self) -> PromptTemplate {
        self.template
    }

    /// Render the full conversation. When the last message is not an
    /// assistant turn, Llama3/ChatML append the assistant header so the
    /// model continues as the assistant.
    pub fn render(&self, messages: &[Message]) -> Result<String> {
        if messages.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidTemplate,
                "cannot render an empty message list",
            ));
        }

        match self.template {
            PromptTemplate::Llama3 => Ok(render_llama3(messages)),
            PromptTemplate::ChatML => Ok(render_chatml(messages)),
            PromptTemplate::Custom => {
                let tmpl = self.custom_template.as_deref().ok_or_else(|| {
                    Error::new(ErrorKind::InvalidTemplate, "custom template not provided")
                })?;
                Ok(render_custom(messages, tmpl))
            }
        }
    }
}

fn render_llama3(messages: &[Message]) -> String {
    let mut out = String::from("<|begin_of_text|>");
    for msg in messages {
        out.push_str("<|start_header_id|>");
        out.push_str(msg.role.as_str());
        out.push_str("<|end_header_id|>\n\n");
        out.push_str(&msg.content);
        out.push_str("<|eot_id|>");
    }
    if messages.last().map(|m| m.role) != Some(Role::Assistant) {
        out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    }
    out
}

fn render_chatml(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str("<|im_start|>");
        out.push_str(msg.role.as_str());
        out.push('\n');
        out.push_str(&msg.content);
        out.push_str("<|im_end|>\n");
    }
    if messages.last().map(|m| m.role) != Some(Role::Assistant) {
        out.push_str("<|im_start|>assistant\n");
    }
    out
}

fn render_custom(messages: &[Message], tmpl: &str) -> String {
    let mut out = String::new();
    for msg in messages {
        let formatted = tmpl
            .replace("{{role}}", msg.role.as_str())
            .replace("{{content}}", &msg.content);
        out.push_str(&formatted);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::Message;

    #[test]
    fn llama3_appends_generation_header() {
        let engine = TemplateEngine::new(PromptTemplate::Llama3, None);
        let prompt = engine
            .render(&[Message::system("Be brief."), Message::user("Hi")])
            .unwrap();
        assert_eq!(
            prompt,
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nHi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn llama3_skips_generation_header_after_assistant() {
        let engine = TemplateEngine::new(PromptTemplate::Llama3, None);
        let prompt = engine
            .render(&[Message::user("Hi"), Message::assistant("Hello")])
            .unwrap();
        assert!(prompt.ends_with("Hello<|eot_id|>"));
    }

    #[test]
    fn chatml_format() {
        let engine = TemplateEngine::new(PromptTemplate::ChatML, None);
        let prompt = engine.render(&[Message::user("Hi")]).unwrap();
        assert_eq!(prompt, "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\n");
    }

    #[test]
    fn custom_replaces_all_placeholders() {
        let engine = TemplateEngine::new(
            PromptTemplate::Custom,
            Some("[{{role}}|{{role}}] {{content}}\n".into()),
        );
        let prompt = engine.render(&[Message::user("x")]).unwrap();
        assert_eq!(prompt, "[user|user] x\n");
    }

    #[test]
    fn custom_without_template_fails() {
        let engine = TemplateEngine::new(PromptTemplate::Custom, None);
        let err = engine.render(&[Message::user("x")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplate);
    }

    #[test]
    fn empty_message_list_fails() {
        let engine = TemplateEngine::new(PromptTemplate::Llama3, None);
        let err = engine.render(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplate);
    }
}
