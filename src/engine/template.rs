use tera::{Context, Tera};

use crate::db::entities::target;

/// Renders a campaign's message template for one target. Templates come from
/// the wizard and may reference `{{ username }}`, `{{ name }}` and
/// `{{ handle }}`.
pub fn render_message(template: &str, target_row: &target::Model) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("username", &target_row.username);
    context.insert("handle", &format!("@{}", target_row.username));
    context.insert(
        "name",
        target_row
            .display_name
            .as_deref()
            .unwrap_or(&target_row.username),
    );
    Tera::one_off(template, &context, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::TargetStatus;
    use chrono::Utc;

    fn target(username: &str, display_name: Option<&str>) -> target::Model {
        target::Model {
            id: 1,
            campaign_id: 1,
            external_id: "100".to_string(),
            username: username.to_string(),
            display_name: display_name.map(str::to_string),
            status: TargetStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_with_display_name() {
        let rendered =
            render_message("Hey {{ name }}, loved your posts!", &target("jdoe", Some("Jane Doe")))
                .unwrap();
        assert_eq!(rendered, "Hey Jane Doe, loved your posts!");
    }

    #[test]
    fn test_render_falls_back_to_username() {
        let rendered = render_message("Hi {{ name }} ({{ handle }})", &target("jdoe", None)).unwrap();
        assert_eq!(rendered, "Hi jdoe (@jdoe)");
    }

    #[test]
    fn test_render_plain_text_passthrough() {
        let rendered = render_message("No placeholders here.", &target("jdoe", None)).unwrap();
        assert_eq!(rendered, "No placeholders here.");
    }

    #[test]
    fn test_render_invalid_template_errors() {
        assert!(render_message("Hello {{ name ", &target("jdoe", None)).is_err());
    }
}
