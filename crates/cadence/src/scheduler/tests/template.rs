use super::common::{company, debt};
use crate::scheduler::template::{render, TemplateVars};

fn vars() -> TemplateVars {
    TemplateVars {
        customer_name: Some("Ana Souza".to_string()),
        amount: Some("R$ 1.234,56".to_string()),
        due_date: Some("01/02/2024".to_string()),
        days_overdue: Some("7".to_string()),
    }
}

#[test]
fn substitutes_every_known_variable() {
    let rendered = render(
        "Olá {customer_name}, {amount} venceu em {due_date} ({days_overdue} dias).",
        &vars(),
    );
    assert_eq!(
        rendered.text,
        "Olá Ana Souza, R$ 1.234,56 venceu em 01/02/2024 (7 dias)."
    );
    assert!(rendered.missing.is_empty());
}

#[test]
fn unknown_placeholders_stay_verbatim() {
    let rendered = render("Código {boleto_id} para {customer_name}", &vars());
    assert_eq!(rendered.text, "Código {boleto_id} para Ana Souza");
    assert!(rendered.missing.is_empty());
}

#[test]
fn missing_known_variables_render_empty_and_are_reported() {
    let mut vars = vars();
    vars.customer_name = None;
    let rendered = render("Olá {customer_name}, pague {amount}", &vars);
    assert_eq!(rendered.text, "Olá , pague R$ 1.234,56");
    assert_eq!(rendered.missing, vec!["customer_name".to_string()]);
}

#[test]
fn unterminated_brace_is_copied_through() {
    let rendered = render("Saldo {amount} em aberto {", &vars());
    assert_eq!(rendered.text, "Saldo R$ 1.234,56 em aberto {");
}

#[test]
fn debt_vars_use_the_company_locale() {
    let vars = TemplateVars::for_debt(&debt("d-1"), &company(), 7);
    assert_eq!(vars.customer_name.as_deref(), Some("Ana Souza"));
    assert_eq!(vars.amount.as_deref(), Some("R$ 1.234,56"));
    assert_eq!(vars.due_date.as_deref(), Some("01/02/2024"));
    assert_eq!(vars.days_overdue.as_deref(), Some("7"));
}

#[test]
fn blank_customer_name_counts_as_missing() {
    let mut debt = debt("d-1");
    debt.customer_name = "   ".to_string();
    let vars = TemplateVars::for_debt(&debt, &company(), 0);
    assert!(vars.customer_name.is_none());
}

#[test]
fn days_overdue_never_goes_negative() {
    let vars = TemplateVars::for_debt(&debt("d-1"), &company(), -3);
    assert_eq!(vars.days_overdue.as_deref(), Some("0"));
}
