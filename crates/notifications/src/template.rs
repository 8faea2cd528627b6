//! Order confirmation email template.
//!
//! Rendering is infallible: missing variables render empty and malformed
//! lines are skipped, so a sparse payload still produces a sendable email.

use std::fmt::Write as _;

use serde_json::Value;

use storefront_core::EmailAddress;

use crate::job::TemplatePayload;
use crate::mailer::EmailMessage;

#[derive(Debug, Clone, Default)]
pub struct OrderConfirmationTemplate;

impl OrderConfirmationTemplate {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, to: &EmailAddress, from: &str, payload: &TemplatePayload) -> EmailMessage {
        let reference = text(payload, "reference");
        let customer = text(payload, "customer_name");
        let status = text(payload, "status");
        let total = text(payload, "total");
        let note = text(payload, "note");
        let lines = lines(payload);

        let subject = if reference.is_empty() {
            "Order confirmation".to_string()
        } else {
            format!("Order confirmation {reference}")
        };

        EmailMessage {
            to: to.clone(),
            from: from.to_string(),
            subject,
            text_body: render_text(&customer, &reference, &status, &lines, &total, &note),
            html_body: render_html(&customer, &reference, &status, &lines, &total, &note),
        }
    }
}

struct Line {
    product_name: String,
    quantity: String,
    unit_price: String,
    subtotal: String,
}

fn text(payload: &TemplatePayload, key: &str) -> String {
    payload.get(key).map(value_to_text).unwrap_or_default()
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn lines(payload: &TemplatePayload) -> Vec<Line> {
    let Some(Value::Array(items)) = payload.get("lines") else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .filter(|item| item.contains_key("product_name"))
        .map(|item| Line {
            product_name: text(item, "product_name"),
            quantity: text(item, "quantity"),
            unit_price: text(item, "unit_price"),
            subtotal: text(item, "subtotal"),
        })
        .collect()
}

fn render_text(
    customer: &str,
    reference: &str,
    status: &str,
    lines: &[Line],
    total: &str,
    note: &str,
) -> String {
    let mut out = String::new();
    if customer.is_empty() {
        out.push_str("Hello,\n\n");
    } else {
        let _ = write!(out, "Hello {customer},\n\n");
    }
    if reference.is_empty() {
        out.push_str("Thank you for your order.\n");
    } else {
        let _ = writeln!(out, "Thank you for your order {reference}.");
    }
    if !status.is_empty() {
        let _ = writeln!(out, "Status: {status}");
    }
    if !lines.is_empty() {
        out.push('\n');
        for line in lines {
            let _ = writeln!(
                out,
                "- {} x{} @ {} = {}",
                line.product_name, line.quantity, line.unit_price, line.subtotal
            );
        }
    }
    if !total.is_empty() {
        let _ = write!(out, "\nTotal: {total}\n");
    }
    if !note.is_empty() {
        let _ = write!(out, "\nNote: {note}\n");
    }
    out
}

fn render_html(
    customer: &str,
    reference: &str,
    status: &str,
    lines: &[Line],
    total: &str,
    note: &str,
) -> String {
    let mut out = String::from("<html><body>");
    if customer.is_empty() {
        out.push_str("<p>Hello,</p>");
    } else {
        let _ = write!(out, "<p>Hello {},</p>", escape_html(customer));
    }
    if reference.is_empty() {
        out.push_str("<p>Thank you for your order.</p>");
    } else {
        let _ = write!(
            out,
            "<p>Thank you for your order <strong>{}</strong>.</p>",
            escape_html(reference)
        );
    }
    if !status.is_empty() {
        let _ = write!(out, "<p>Status: {}</p>", escape_html(status));
    }
    if !lines.is_empty() {
        out.push_str("<table><tr><th>Product</th><th>Qty</th><th>Unit price</th><th>Subtotal</th></tr>");
        for line in lines {
            let _ = write!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&line.product_name),
                escape_html(&line.quantity),
                escape_html(&line.unit_price),
                escape_html(&line.subtotal)
            );
        }
        out.push_str("</table>");
    }
    if !total.is_empty() {
        let _ = write!(out, "<p>Total: <strong>{}</strong></p>", escape_html(total));
    }
    if !note.is_empty() {
        let _ = write!(out, "<p>Note: {}</p>", escape_html(note));
    }
    out.push_str("</body></html>");
    out
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> EmailAddress {
        EmailAddress::parse("buyer@example.com").unwrap()
    }

    fn payload(value: serde_json::Value) -> TemplatePayload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn renders_order_details_in_both_bodies() {
        let payload = payload(serde_json::json!({
            "reference": "2024/0042",
            "customer_name": "Amine",
            "status": "new_order",
            "total": "255.000 TND",
            "lines": [
                {"product_name": "Whey 2kg", "quantity": 2, "unit_price": "120.000 TND", "subtotal": "240.000 TND"}
            ]
        }));

        let message = OrderConfirmationTemplate::new().render(&recipient(), "contact@protein.tn", &payload);

        assert_eq!(message.subject, "Order confirmation 2024/0042");
        assert_eq!(message.from, "contact@protein.tn");
        assert_eq!(message.to.as_str(), "buyer@example.com");
        assert!(message.text_body.contains("Hello Amine,"));
        assert!(message.text_body.contains("- Whey 2kg x2 @ 120.000 TND = 240.000 TND"));
        assert!(message.text_body.contains("Total: 255.000 TND"));
        assert!(message.html_body.contains("<strong>2024/0042</strong>"));
        assert!(message.html_body.contains("<td>Whey 2kg</td>"));
    }

    #[test]
    fn sparse_payload_still_renders() {
        let message = OrderConfirmationTemplate::new().render(&recipient(), "Shop", &TemplatePayload::new());
        assert_eq!(message.subject, "Order confirmation");
        assert!(message.text_body.starts_with("Hello,"));
        assert!(!message.html_body.contains("<table>"));
    }

    #[test]
    fn html_body_escapes_payload_values() {
        let payload = payload(serde_json::json!({
            "customer_name": "<script>alert('x')</script>",
            "note": "fast & \"careful\"",
        }));
        let message = OrderConfirmationTemplate::new().render(&recipient(), "Shop", &payload);

        assert!(!message.html_body.contains("<script>"));
        assert!(message.html_body.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
        assert!(message.html_body.contains("fast &amp; &quot;careful&quot;"));
        assert!(message.text_body.contains("Note: fast & \"careful\""));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let payload = payload(serde_json::json!({
            "lines": [42, {"quantity": 1}, {"product_name": "Creatine", "quantity": 1}]
        }));
        let message = OrderConfirmationTemplate::new().render(&recipient(), "Shop", &payload);
        assert!(message.text_body.contains("- Creatine x1"));
        assert_eq!(message.text_body.matches("\n- ").count(), 1);
    }
}
