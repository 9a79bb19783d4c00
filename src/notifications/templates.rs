use rust_decimal::Decimal;

use super::Email;
use crate::entities::OrderModel;

/// A line as it appears in an email body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLine {
    pub name: String,
    pub size: Option<String>,
    pub quantity: i64,
    pub unit_price: Decimal,
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(amount: Decimal, currency: &str) -> String {
    format!("{} {}", amount.round_dp(2), currency.to_uppercase())
}

fn lines_table(lines: &[ReceiptLine], currency: &str) -> String {
    if lines.is_empty() {
        return "<p>Item details will follow separately.</p>".to_string();
    }
    let rows: String = lines
        .iter()
        .map(|line| {
            let label = match &line.size {
                Some(size) => format!("{} ({})", escape(&line.name), escape(size)),
                None => escape(&line.name),
            };
            format!(
                "<tr><td>{label}</td><td>{}</td><td>{}</td></tr>",
                line.quantity,
                money(line.unit_price, currency)
            )
        })
        .collect();
    format!("<table><tr><th>Item</th><th>Qty</th><th>Price</th></tr>{rows}</table>")
}

fn short_id(order: &OrderModel) -> String {
    order.id.simple().to_string()[..8].to_uppercase()
}

pub fn customer_confirmation(order: &OrderModel, lines: &[ReceiptLine]) -> Email {
    let greeting = order
        .customer_name
        .as_deref()
        .map(|name| format!("Hi {},", escape(name)))
        .unwrap_or_else(|| "Hi,".to_string());
    Email {
        to: order.customer_email.clone(),
        subject: format!("Order confirmed #{}", short_id(order)),
        html: format!(
            "<p>{greeting}</p><p>Thanks for your order. We have received your payment of {}.</p>{}<p>We will email you again when it is on its way.</p>",
            money(order.total_amount, &order.currency),
            lines_table(lines, &order.currency),
        ),
    }
}

pub fn admin_new_order(admin: &str, order: &OrderModel, lines: &[ReceiptLine]) -> Email {
    Email {
        to: admin.to_string(),
        subject: format!("New order #{} ({})", short_id(order), money(order.total_amount, &order.currency)),
        html: format!(
            "<p>New paid order from {} ({}).</p><p>Order id: {}</p>{}",
            escape(order.customer_name.as_deref().unwrap_or("unknown customer")),
            escape(&order.customer_email),
            order.id,
            lines_table(lines, &order.currency),
        ),
    }
}

pub fn admin_checkout_started(
    admin: &str,
    customer_email: &str,
    customer_name: Option<&str>,
    lines: &[ReceiptLine],
    currency: &str,
) -> Email {
    Email {
        to: admin.to_string(),
        subject: format!("Checkout started by {customer_email}"),
        html: format!(
            "<p>{} ({}) has started checkout.</p>{}",
            escape(customer_name.unwrap_or("A customer")),
            escape(customer_email),
            lines_table(lines, currency),
        ),
    }
}

pub fn customer_dispatched(to: &str, order: &OrderModel) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("Your order #{} has been dispatched", short_id(order)),
        html: format!(
            "<p>Good news! Your order #{} is on its way.</p><p>Order total: {}</p>",
            short_id(order),
            money(order.total_amount, &order.currency),
        ),
    }
}
