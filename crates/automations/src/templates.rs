//! Template rendering: locale selection, `{{key}}` substitution and button
//! mapping. No I/O.

use std::collections::HashMap;
use std::sync::LazyLock;

use growth_core::types::ButtonAction;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::types::{ButtonSpec, LocalizedContent, MessageTemplate};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Text and buttons ready for the bot transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub text: String,
    pub buttons: Vec<ButtonAction>,
}

/// Renders `template` for `locale`, falling back to the template's base
/// locale and then to its first locale. Placeholders without a variable are
/// dropped from the output.
pub fn render_template(
    template: &MessageTemplate,
    locale: &str,
    variables: &HashMap<String, String>,
) -> RenderedMessage {
    let Some(content) = select_locale(template, locale) else {
        return RenderedMessage {
            text: String::new(),
            buttons: Vec::new(),
        };
    };

    RenderedMessage {
        text: substitute(&content.text, variables),
        buttons: content
            .buttons
            .iter()
            .map(|b| map_button(b, variables))
            .collect(),
    }
}

fn select_locale<'a>(template: &'a MessageTemplate, locale: &str) -> Option<&'a LocalizedContent> {
    template
        .locales
        .get(locale)
        .or_else(|| template.locales.get(&template.base_locale))
        .or_else(|| template.locales.values().next())
}

pub fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

fn map_button(spec: &ButtonSpec, variables: &HashMap<String, String>) -> ButtonAction {
    let text = substitute(&spec.text, variables);
    let value = substitute(&spec.value, variables);
    match spec.action.as_str() {
        "callback" => ButtonAction::Callback { text, data: value },
        _ => ButtonAction::Url { text, url: value },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn content(text: &str, buttons: Vec<ButtonSpec>) -> LocalizedContent {
        LocalizedContent {
            text: text.to_string(),
            buttons,
        }
    }

    fn template() -> MessageTemplate {
        let mut locales = BTreeMap::new();
        locales.insert("ru".to_string(), content("Привет, {{name}}!", vec![]));
        locales.insert(
            "en".to_string(),
            content(
                "Hi {{ name }}, your bonus is {{bonus_percent}}%",
                vec![
                    ButtonSpec {
                        text: "Top up".into(),
                        action: "callback".into(),
                        value: "topup:{{bonus_percent}}".into(),
                    },
                    ButtonSpec {
                        text: "Docs".into(),
                        action: "url".into(),
                        value: "https://example.com/docs".into(),
                    },
                    ButtonSpec {
                        text: "Odd".into(),
                        action: "webapp".into(),
                        value: "https://example.com/app".into(),
                    },
                ],
            ),
        );
        MessageTemplate {
            base_locale: "ru".to_string(),
            locales,
        }
    }

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("name".to_string(), "Alice".to_string()),
            ("bonus_percent".to_string(), "15".to_string()),
        ])
    }

    #[test]
    fn test_substitution_leaves_no_markers() {
        let rendered = render_template(&template(), "en", &vars());
        assert_eq!(rendered.text, "Hi Alice, your bonus is 15%");
        assert!(!rendered.text.contains("{{"));
    }

    #[test]
    fn test_missing_locale_falls_back_to_base() {
        let rendered = render_template(&template(), "de", &vars());
        assert_eq!(rendered.text, "Привет, Alice!");
        assert!(rendered.buttons.is_empty());
    }

    #[test]
    fn test_base_locale_absent_uses_first_locale() {
        let mut tpl = template();
        tpl.base_locale = "fr".into();
        let rendered = render_template(&tpl, "de", &vars());
        // BTreeMap order: "en" < "ru".
        assert!(rendered.text.starts_with("Hi Alice"));
    }

    #[test]
    fn test_button_mapping() {
        let rendered = render_template(&template(), "en", &vars());
        assert_eq!(
            rendered.buttons,
            vec![
                ButtonAction::Callback { text: "Top up".into(), data: "topup:15".into() },
                ButtonAction::Url { text: "Docs".into(), url: "https://example.com/docs".into() },
                ButtonAction::Url { text: "Odd".into(), url: "https://example.com/app".into() },
            ]
        );
    }

    #[test]
    fn test_unknown_placeholder_removed() {
        assert_eq!(substitute("a{{missing}}b", &HashMap::new()), "ab");
    }
}
