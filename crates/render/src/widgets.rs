//! Widget templates. Each widget emits `data-belief` / `data-pane-id`
//! attributes and HTMX hooks so interaction posts an event batch to
//! `/auth/state` without a page reload.

use tractstack_core::beliefs::BeliefScale;
use tractstack_core::types::{BeliefMap, WidgetNode};

use crate::html::{escape_attr, escape_text};

/// Serialize the `hx-vals` JSON for a single belief event.
fn belief_vals(slug: &str, verb: &str, object: Option<&str>) -> String {
    let mut event = serde_json::json!({
        "type": "Belief",
        "id": slug,
        "verb": verb,
    });
    if let Some(object) = object {
        event["object"] = serde_json::Value::String(object.to_string());
    }
    serde_json::json!({ "events": [event] }).to_string()
}

fn held_value<'a>(beliefs: &'a BeliefMap, slug: &str) -> Option<&'a str> {
    beliefs
        .get(slug)
        .and_then(|values| values.first())
        .map(String::as_str)
}

pub fn render_widget(out: &mut String, pane_id: &str, widget: &WidgetNode, beliefs: &BeliefMap) {
    match widget {
        WidgetNode::Belief { slug, scale, prompt } => {
            render_belief_select(out, pane_id, slug, *scale, prompt, beliefs);
        }
        WidgetNode::Toggle { slug, prompt } => {
            render_toggle(out, pane_id, slug, prompt, beliefs);
        }
        WidgetNode::IdentifyAs {
            slug,
            target,
            prompt,
        } => {
            render_identify_as(out, pane_id, slug, target, prompt, beliefs);
        }
        WidgetNode::Youtube { embed_code, title } => {
            out.push_str(&format!(
                "<div class=\"widget-youtube\"><iframe src=\"https://www.youtube.com/embed/{}\" title=\"{}\" allowfullscreen></iframe></div>",
                escape_attr(embed_code),
                escape_attr(title),
            ));
        }
        WidgetNode::Signup {
            persona,
            prompt,
            clarify_consent,
        } => {
            render_signup(out, persona, prompt, *clarify_consent);
        }
    }
}

fn render_belief_select(
    out: &mut String,
    pane_id: &str,
    slug: &str,
    scale: BeliefScale,
    prompt: &str,
    beliefs: &BeliefMap,
) {
    let held = held_value(beliefs, slug);
    out.push_str(&format!(
        "<div class=\"widget-belief\" data-belief=\"{}\" data-pane-id=\"{}\"><label>{}</label>",
        escape_attr(slug),
        escape_attr(pane_id),
        escape_text(prompt),
    ));
    out.push_str(&format!(
        "<select hx-post=\"/auth/state\" hx-trigger=\"change\" name=\"{}\" data-belief=\"{}\">",
        escape_attr(slug),
        escape_attr(slug),
    ));
    out.push_str("<option value=\"\">...</option>");
    for verb in scale.legal_verbs() {
        let selected = if held == Some(verb) { " selected" } else { "" };
        out.push_str(&format!(
            "<option value=\"{verb}\" data-vals=\"{}\"{selected}>{}</option>",
            escape_attr(&belief_vals(slug, verb, None)),
            escape_text(&verb.replace('_', " ").to_lowercase()),
        ));
    }
    out.push_str("</select></div>");
}

fn render_toggle(out: &mut String, pane_id: &str, slug: &str, prompt: &str, beliefs: &BeliefMap) {
    let held = held_value(beliefs, slug) == Some("BELIEVES_YES");
    let (verb, pressed) = if held {
        ("UNSET", "true")
    } else {
        ("BELIEVES_YES", "false")
    };
    out.push_str(&format!(
        "<button class=\"widget-toggle\" data-belief=\"{}\" data-pane-id=\"{}\" aria-pressed=\"{pressed}\" hx-post=\"/auth/state\" hx-vals=\"{}\">{}</button>",
        escape_attr(slug),
        escape_attr(pane_id),
        escape_attr(&belief_vals(slug, verb, None)),
        escape_text(prompt),
    ));
}

fn render_identify_as(
    out: &mut String,
    pane_id: &str,
    slug: &str,
    target: &str,
    prompt: &str,
    beliefs: &BeliefMap,
) {
    let matched = beliefs
        .get(slug)
        .map(|values| values.iter().any(|v| v == target))
        .unwrap_or(false);
    let pressed = if matched { "true" } else { "false" };
    out.push_str(&format!(
        "<button class=\"widget-identify-as\" data-belief=\"{}\" data-pane-id=\"{}\" aria-pressed=\"{pressed}\" hx-post=\"/auth/state\" hx-vals=\"{}\">{}</button>",
        escape_attr(slug),
        escape_attr(pane_id),
        escape_attr(&belief_vals(slug, "IDENTIFY_AS", Some(target))),
        escape_text(prompt),
    ));
}

fn render_signup(out: &mut String, persona: &str, prompt: &str, clarify_consent: bool) {
    out.push_str(&format!(
        "<form class=\"widget-signup\" data-persona=\"{}\" hx-post=\"/auth/signup\">",
        escape_attr(persona),
    ));
    out.push_str(&format!("<p>{}</p>", escape_text(prompt)));
    out.push_str("<input type=\"email\" name=\"email\" required placeholder=\"email\">");
    if clarify_consent {
        out.push_str(
            "<label><input type=\"checkbox\" name=\"consent\" required> Keep me posted</label>",
        );
    }
    out.push_str("<button type=\"submit\">Sign up</button></form>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn beliefs(slug: &str, value: &str) -> BeliefMap {
        let mut map = BTreeMap::new();
        map.insert(slug.to_string(), vec![value.to_string()]);
        map
    }

    #[test]
    fn test_toggle_reflects_held_state() {
        let mut out = String::new();
        render_widget(
            &mut out,
            "p1",
            &WidgetNode::Toggle {
                slug: "dark-mode".to_string(),
                prompt: "Dark mode?".to_string(),
            },
            &beliefs("dark-mode", "BELIEVES_YES"),
        );
        assert!(out.contains("aria-pressed=\"true\""));
        assert!(out.contains("UNSET"));
        assert!(out.contains("data-pane-id=\"p1\""));
    }

    #[test]
    fn test_identify_as_escapes_and_marks_match() {
        let mut out = String::new();
        render_widget(
            &mut out,
            "p1",
            &WidgetNode::IdentifyAs {
                slug: "mood".to_string(),
                target: "ha\"ppy".to_string(),
                prompt: "<b>Happy?</b>".to_string(),
            },
            &beliefs("mood", "ha\"ppy"),
        );
        assert!(out.contains("aria-pressed=\"true\""));
        assert!(out.contains("&lt;b&gt;Happy?&lt;/b&gt;"));
        assert!(!out.contains("<b>Happy?</b>"));
    }

    #[test]
    fn test_belief_select_marks_selected_verb() {
        let mut out = String::new();
        render_widget(
            &mut out,
            "p1",
            &WidgetNode::Belief {
                slug: "agrees".to_string(),
                scale: BeliefScale::Agreement,
                prompt: "Agree?".to_string(),
            },
            &beliefs("agrees", "AGREES"),
        );
        assert!(out.contains("<option value=\"AGREES\""));
        assert!(out.contains("selected"));
        assert!(out.contains("hx-post=\"/auth/state\""));
    }
}
