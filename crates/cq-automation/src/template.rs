//! Prompt rendering for automation columns.
//!
//! Templates use `{variable}` placeholders, expanded by simple substring
//! replacement. Unknown variables are left literal rather than erroring —
//! columns that reference a variable this version doesn't populate still
//! produce a usable prompt.

use std::collections::HashMap;

use cq_core::types::{Card, Column};

pub const DEFAULT_TEMPLATE: &str = "You are a {agent_type} agent. Card: {card_title}\n\n{card_description}\n\nPrevious output:\n{last_agent_output}\n\nPerform your role; if reviewing, state APPROVED or REJECTED.";

pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut output = template.to_string();
    for (key, value) in vars {
        output = output.replace(&format!("{{{key}}}"), value);
    }
    output
}

/// Assemble the standard variable set documented for automation columns:
/// `card_title`, `card_description`, `card_labels`, `card_priority`,
/// `card_comments`, `last_agent_output`, `column_name`, `board_name`.
#[allow(clippy::too_many_arguments)]
pub fn build_vars(
    card: &Card,
    column: &Column,
    board_name: &str,
    card_comments: &str,
    last_agent_output: &str,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("card_title".into(), card.title.clone());
    vars.insert("card_description".into(), card.description.clone());
    vars.insert("card_labels".into(), card.labels.join(", "));
    vars.insert("card_priority".into(), card.priority.to_string());
    vars.insert("card_comments".into(), card_comments.to_string());
    vars.insert("last_agent_output".into(), last_agent_output.to_string());
    vars.insert("column_name".into(), column.name.clone());
    vars.insert("board_name".into(), board_name.to_string());
    vars.insert(
        "agent_type".into(),
        column.automation.agent_type.clone().unwrap_or_default(),
    );
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let mut vars = HashMap::new();
        vars.insert("card_title".into(), "Design login".into());
        let out = render("Card: {card_title}", &vars);
        assert_eq!(out, "Card: Design login");
    }

    #[test]
    fn leaves_unknown_variables_literal() {
        let vars = HashMap::new();
        let out = render("Hello {whoever}", &vars);
        assert_eq!(out, "Hello {whoever}");
    }

    #[test]
    fn default_template_renders_with_full_var_set() {
        let mut vars = HashMap::new();
        vars.insert("agent_type".into(), "architect".into());
        vars.insert("card_title".into(), "Design login".into());
        vars.insert("card_description".into(), "OAuth2".into());
        vars.insert("last_agent_output".into(), "".into());
        let out = render(DEFAULT_TEMPLATE, &vars);
        assert!(out.contains("architect agent"));
        assert!(out.contains("Design login"));
        assert!(out.contains("OAuth2"));
    }
}
