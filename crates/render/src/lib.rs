#![warn(clippy::unwrap_used)]

//! Pane fragment renderer. Pure: the pane snapshot and the resolved
//! user-belief subset are passed in, so the HTML cache key derived from
//! those inputs is always correct.

pub mod html;
pub mod widgets;

use pulldown_cmark::Parser;
use tractstack_core::types::{BeliefMap, Pane, PaneNode};

use crate::html::{escape_attr, escape_text};
use crate::widgets::render_widget;

/// Render one pane to an HTML fragment. `beliefs` must already be filtered
/// to the slugs this pane references.
pub fn render_pane(pane: &Pane, beliefs: &BeliefMap) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str(&format!(
        "<div class=\"pane\" id=\"pane-{}\" data-pane-id=\"{}\" data-pane-slug=\"{}\">",
        escape_attr(&pane.id),
        escape_attr(&pane.id),
        escape_attr(&pane.slug),
    ));
    for node in &pane.options.nodes {
        render_node(&mut out, &pane.id, node, beliefs);
    }
    out.push_str("</div>");
    out
}

fn render_node(out: &mut String, pane_id: &str, node: &PaneNode, beliefs: &BeliefMap) {
    match node {
        PaneNode::Heading { level, text } => {
            let level = (*level).clamp(1, 6);
            out.push_str(&format!("<h{level}>{}</h{level}>", escape_text(text)));
        }
        PaneNode::Paragraph { text } => {
            out.push_str(&format!("<p>{}</p>", escape_text(text)));
        }
        PaneNode::Markdown { body } => {
            pulldown_cmark::html::push_html(out, Parser::new(body));
        }
        PaneNode::Image { src, alt } => {
            out.push_str(&format!(
                "<img src=\"{}\" alt=\"{}\">",
                escape_attr(src),
                escape_attr(alt.as_deref().unwrap_or("")),
            ));
        }
        PaneNode::Button { label, href } => {
            out.push_str(&format!(
                "<a class=\"button\" href=\"{}\">{}</a>",
                escape_attr(href),
                escape_text(label),
            ));
        }
        PaneNode::Link { label, href } => {
            out.push_str(&format!(
                "<a href=\"{}\">{}</a>",
                escape_attr(href),
                escape_text(label),
            ));
        }
        PaneNode::Widget(widget) => {
            render_widget(out, pane_id, widget, beliefs);
        }
    }
}

/// Filter a full belief vector down to the slugs one pane references.
/// This is what keeps fragment-cache keys minimal and stable.
pub fn filter_beliefs(pane: &Pane, beliefs: &BeliefMap) -> BeliefMap {
    pane.options
        .referenced_slugs()
        .into_iter()
        .filter_map(|slug| beliefs.get(&slug).map(|values| (slug, values.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tractstack_core::types::PaneOptions;

    fn pane_with(nodes: Vec<PaneNode>) -> Pane {
        Pane {
            id: "p1".to_string(),
            slug: "intro".to_string(),
            title: "Intro".to_string(),
            options: PaneOptions {
                nodes,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_renders_basic_elements() {
        let pane = pane_with(vec![
            PaneNode::Heading {
                level: 2,
                text: "Hello & welcome".to_string(),
            },
            PaneNode::Paragraph {
                text: "Body".to_string(),
            },
            PaneNode::Image {
                src: "/img/a.png".to_string(),
                alt: None,
            },
        ]);
        let html = render_pane(&pane, &BTreeMap::new());
        assert!(html.starts_with("<div class=\"pane\" id=\"pane-p1\""));
        assert!(html.contains("<h2>Hello &amp; welcome</h2>"));
        assert!(html.contains("<p>Body</p>"));
        assert!(html.contains("<img src=\"/img/a.png\""));
    }

    #[test]
    fn test_markdown_node_renders() {
        let pane = pane_with(vec![PaneNode::Markdown {
            body: "# Title\n\nsome *emphasis*".to_string(),
        }]);
        let html = render_pane(&pane, &BTreeMap::new());
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>emphasis</em>"));
    }

    #[test]
    fn test_heading_level_is_clamped() {
        let pane = pane_with(vec![PaneNode::Heading {
            level: 9,
            text: "Deep".to_string(),
        }]);
        let html = render_pane(&pane, &BTreeMap::new());
        assert!(html.contains("<h6>Deep</h6>"));
    }

    #[test]
    fn test_filter_beliefs_keeps_only_referenced() {
        let mut pane = pane_with(Vec::new());
        pane.options
            .held_beliefs
            .insert("mood".to_string(), vec!["happy".to_string()]);

        let mut all = BTreeMap::new();
        all.insert("mood".to_string(), vec!["happy".to_string()]);
        all.insert("unrelated".to_string(), vec!["x".to_string()]);

        let filtered = filter_beliefs(&pane, &all);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("mood"));
    }
}
