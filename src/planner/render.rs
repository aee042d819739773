//! Deterministic, golden-testable textual rendering of a [`super::Plan`].

use super::{Action, Plan};
use std::fmt::Write as _;

fn icon(action: Action) -> char {
    match action {
        Action::Create => '↑',
        Action::Delete => '↓',
        Action::Update | Action::Recreate => '→',
        Action::Noop => '✓',
    }
}

fn render_section(out: &mut String, title: &str, lines: &[(String, Action, String)]) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}");
    for (name, action, reason) in lines {
        if reason.is_empty() {
            let _ = writeln!(out, "  {} {name}", icon(*action));
        } else {
            let _ = writeln!(out, "  {} {name}: {reason}", icon(*action));
        }
    }
}

/// Render `plan` as stable, human-readable text: section headers
/// (`Stacks`, `Filesets`, `Networks`, `Volumes`) followed by indented,
/// icon-prefixed lines. Empty sections are omitted.
#[must_use]
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();

    let stacks: Vec<(String, Action, String)> = plan
        .services
        .iter()
        .map(|op| {
            (
                format!("{}/{}", op.target.stack, op.target.name),
                op.action,
                op.reason.clone(),
            )
        })
        .collect();
    render_section(&mut out, "Stacks", &stacks);

    let filesets: Vec<(String, Action, String)> = plan
        .filesets
        .iter()
        .map(|op| (op.target.name.clone(), op.action, op.reason.clone()))
        .collect();
    render_section(&mut out, "Filesets", &filesets);

    let networks: Vec<(String, Action, String)> = plan
        .networks
        .iter()
        .map(|op| (op.target.name.clone(), op.action, op.reason.clone()))
        .collect();
    render_section(&mut out, "Networks", &networks);

    let volumes: Vec<(String, Action, String)> = plan
        .volumes
        .iter()
        .map(|op| (op.target.name.clone(), op.action, op.reason.clone()))
        .collect();
    render_section(&mut out, "Volumes", &volumes);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Kind, Operation, Target};

    fn op(kind: Kind, stack: &str, name: &str, action: Action, reason: &str) -> Operation {
        Operation {
            target: Target {
                kind,
                stack: stack.to_string(),
                name: name.to_string(),
            },
            action,
            reason: reason.to_string(),
            deps: Vec::new(),
        }
    }

    #[test]
    fn empty_plan_renders_empty_string() {
        assert_eq!(render_plan(&Plan::default()), "");
    }

    #[test]
    fn omits_empty_sections() {
        let plan = Plan {
            networks: vec![op(Kind::Network, "", "net-a", Action::Create, "absent from engine")],
            ..Default::default()
        };
        let rendered = render_plan(&plan);
        assert!(rendered.contains("Networks"));
        assert!(!rendered.contains("Volumes"));
        assert!(!rendered.contains("Stacks"));
    }

    #[test]
    fn uses_section_order_and_icons() {
        let plan = Plan {
            services: vec![op(Kind::Service, "web", "nginx", Action::Create, "no running container")],
            networks: vec![op(Kind::Network, "", "net-a", Action::Delete, "not in manifest")],
            volumes: vec![op(Kind::Volume, "", "data", Action::Noop, "")],
            ..Default::default()
        };
        let rendered = render_plan(&plan);
        let stacks_pos = rendered.find("Stacks").unwrap();
        let networks_pos = rendered.find("Networks").unwrap();
        let volumes_pos = rendered.find("Volumes").unwrap();
        assert!(stacks_pos < networks_pos);
        assert!(networks_pos < volumes_pos);
        assert!(rendered.contains("↑ web/nginx: no running container"));
        assert!(rendered.contains("↓ net-a: not in manifest"));
        assert!(rendered.contains("✓ data"));
        assert!(!rendered.contains("✓ data:"));
    }
}
