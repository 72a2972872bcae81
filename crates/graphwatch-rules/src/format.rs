//! Fixed-width text tables for notification messages.
//!
//! The row cap bounds outbound message size, not just display: a digest of a
//! thousand findings must not become a thousand-line webhook payload.

/// Maximum rows rendered before the "…and N more" suffix
pub const MAX_TABLE_ROWS: usize = 10;

const MAX_CELL_WIDTH: usize = 32;

/// One table row: name / amount / extra column
#[derive(Debug, Clone)]
pub struct TableRow {
    pub name: String,
    pub amount: String,
    pub extra: String,
}

impl TableRow {
    pub fn new(
        name: impl Into<String>,
        amount: impl Into<String>,
        extra: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            amount: amount.into(),
            extra: extra.into(),
        }
    }
}

fn clip(s: &str) -> String {
    if s.chars().count() <= MAX_CELL_WIDTH {
        s.to_string()
    } else {
        let kept: String = s.chars().take(MAX_CELL_WIDTH - 1).collect();
        format!("{kept}…")
    }
}

/// Render a three-column fixed-width table, capped at [`MAX_TABLE_ROWS`]
pub fn render_table(headers: (&str, &str, &str), rows: &[TableRow]) -> String {
    let shown = &rows[..rows.len().min(MAX_TABLE_ROWS)];

    let cells: Vec<(String, String, String)> = shown
        .iter()
        .map(|r| (clip(&r.name), clip(&r.amount), clip(&r.extra)))
        .collect();

    let mut widths = (headers.0.len(), headers.1.len(), headers.2.len());
    for (name, amount, extra) in &cells {
        widths.0 = widths.0.max(name.chars().count());
        widths.1 = widths.1.max(amount.chars().count());
        widths.2 = widths.2.max(extra.chars().count());
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<w0$}  {:>w1$}  {:<w2$}\n",
        headers.0,
        headers.1,
        headers.2,
        w0 = widths.0,
        w1 = widths.1,
        w2 = widths.2,
    ));
    out.push_str(&format!(
        "{}  {}  {}\n",
        "-".repeat(widths.0),
        "-".repeat(widths.1),
        "-".repeat(widths.2),
    ));
    for (name, amount, extra) in &cells {
        out.push_str(&format!(
            "{:<w0$}  {:>w1$}  {:<w2$}\n",
            name,
            amount,
            extra,
            w0 = widths.0,
            w1 = widths.1,
            w2 = widths.2,
        ));
    }

    if rows.len() > MAX_TABLE_ROWS {
        out.push_str(&format!("…and {} more\n", rows.len() - MAX_TABLE_ROWS));
    }
    out
}

/// Whole-token amount formatted for humans
pub fn tokens_display(tokens: f64) -> String {
    if tokens == 0.0 {
        "0 GRT".to_string()
    } else if tokens.abs() >= 1000.0 {
        format!("{:.0} GRT", tokens)
    } else {
        format!("{:.2} GRT", tokens)
    }
}
