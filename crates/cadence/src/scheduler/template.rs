use super::domain::{CompanyProfile, Debt};

/// Variable bag available to step templates. Known placeholders with no
/// value render empty and are reported; unknown placeholders are left
/// verbatim. Rendering never fails: a malformed template must not block
/// dispatch of an otherwise-correct step.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub customer_name: Option<String>,
    pub amount: Option<String>,
    pub due_date: Option<String>,
    pub days_overdue: Option<String>,
}

impl TemplateVars {
    /// Build the bag for a debt, formatting amount and due date per the
    /// company's locale convention.
    pub fn for_debt(debt: &Debt, company: &CompanyProfile, days_overdue: i64) -> Self {
        let name = debt.customer_name.trim();
        Self {
            customer_name: (!name.is_empty()).then(|| name.to_string()),
            amount: Some(company.locale.format_amount(debt.amount_cents)),
            due_date: Some(company.locale.format_date(debt.due_date)),
            days_overdue: Some(days_overdue.max(0).to_string()),
        }
    }

    fn lookup(&self, key: &str) -> Option<&Option<String>> {
        match key {
            "customer_name" => Some(&self.customer_name),
            "amount" => Some(&self.amount),
            "due_date" => Some(&self.due_date),
            "days_overdue" => Some(&self.days_overdue),
            _ => None,
        }
    }
}

/// Result of a render: the text plus the known variables that had no
/// value (surfaced by the orchestrator as a template-gap warning).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub missing: Vec<String>,
}

pub fn render(template: &str, vars: &TemplateVars) -> Rendered {
    let mut text = String::with_capacity(template.len());
    let mut missing = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        text.push_str(&rest[..open]);
        let after_open = &rest[open..];
        match after_open.find('}') {
            Some(close) => {
                let token = &after_open[1..close];
                match vars.lookup(token) {
                    Some(Some(value)) => text.push_str(value),
                    Some(None) => missing.push(token.to_string()),
                    // Unknown placeholder stays verbatim.
                    None => text.push_str(&after_open[..=close]),
                }
                rest = &after_open[close + 1..];
            }
            None => {
                // Unterminated brace: copy the remainder as-is.
                text.push_str(after_open);
                rest = "";
            }
        }
    }
    text.push_str(rest);

    Rendered { text, missing }
}
