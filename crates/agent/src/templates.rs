use tera::{Context, Tera};

use parley_core::domain::notification::NotificationKind;

pub const FALLBACK_REPLY: &str = "reply_fallback";
pub const PAYMENT_SECTION: &str = "reply_payment_section";
pub const CONFIRM_PRICE_NOTE: &str = "reply_confirm_price_note";

/// Embedded plain-text templates for replies and owner notifications.
pub struct ReplyTemplates {
    tera: Tera,
}

impl ReplyTemplates {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (FALLBACK_REPLY, include_str!("../../../templates/reply/fallback.txt")),
            (PAYMENT_SECTION, include_str!("../../../templates/reply/payment_section.txt")),
            (CONFIRM_PRICE_NOTE, include_str!("../../../templates/reply/confirm_price_note.txt")),
            (
                NotificationKind::AutoResponseSent.template_name(),
                include_str!("../../../templates/notify/auto_response_sent.txt"),
            ),
            (
                NotificationKind::NeedsReview.template_name(),
                include_str!("../../../templates/notify/needs_review.txt"),
            ),
            (
                NotificationKind::ManuallySent.template_name(),
                include_str!("../../../templates/notify/manually_sent.txt"),
            ),
            (
                NotificationKind::BuyerOptedOut.template_name(),
                include_str!("../../../templates/notify/buyer_opted_out.txt"),
            ),
        ])?;
        Ok(Self { tera })
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        self.tera.render(name, context).map(|text| tidy(&text))
    }
}

/// Strips trailing spaces and collapses runs of blank lines left by template
/// conditionals.
fn tidy(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() && lines.last().map_or(true, |previous| previous.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
