// 📊 Reports - cash flow, profit & loss, balance sheet, dashboard analytics
//
// Pure reductions over rows the caller already loaded. Cancelled documents
// never count. Amounts are rounded to cents on the way out.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bill::round_cents;
use crate::entities::{
    Account, AccountCategory, AccountType, Product, Transaction, TransactionKind, Transfer,
};

/// Inclusive date range; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Period {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Period { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryLine {
    pub category_id: Option<i64>,
    pub name: String,
    pub income: f64,
    pub expense: f64,
}

/// Per-category accumulator, uncategorized first then by id
struct CategoryTotals<'a> {
    categories: &'a [AccountCategory],
    lines: BTreeMap<Option<i64>, (f64, f64)>,
}

impl<'a> CategoryTotals<'a> {
    fn new(categories: &'a [AccountCategory]) -> Self {
        CategoryTotals {
            categories,
            lines: BTreeMap::new(),
        }
    }

    fn add(&mut self, category_id: Option<i64>, kind: TransactionKind, amount: f64) {
        let entry = self.lines.entry(category_id).or_insert((0.0, 0.0));
        match kind {
            TransactionKind::Income => entry.0 += amount,
            TransactionKind::Expense => entry.1 += amount,
        }
    }

    fn finish(self) -> Vec<CategoryLine> {
        self.lines
            .into_iter()
            .map(|(category_id, (income, expense))| {
                let name = category_id
                    .and_then(|id| self.categories.iter().find(|c| c.id == id))
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "Uncategorized".to_string());
                CategoryLine {
                    category_id,
                    name,
                    income: round_cents(income),
                    expense: round_cents(expense),
                }
            })
            .collect()
    }
}

fn live<'a>(
    transactions: &'a [Transaction],
    period: Period,
) -> impl Iterator<Item = &'a Transaction> + 'a {
    transactions
        .iter()
        .filter(move |tx| !tx.cancelled && period.contains(tx.date))
}

// ============================================================================
// CASH FLOW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowReport {
    pub period: Period,
    pub inflows: f64,
    pub outflows: f64,
    pub net: f64,
    pub by_category: Vec<CategoryLine>,
    /// Moves between own accounts; they do not change `net`
    pub transfer_count: usize,
    pub transfer_total: f64,
}

/// Cash basis: only what was actually paid
pub fn cash_flow(
    transactions: &[Transaction],
    transfers: &[Transfer],
    categories: &[AccountCategory],
    period: Period,
) -> CashFlowReport {
    let mut inflows = 0.0;
    let mut outflows = 0.0;
    let mut by_category = CategoryTotals::new(categories);

    for tx in live(transactions, period) {
        match tx.kind {
            TransactionKind::Income => inflows += tx.amount_paid,
            TransactionKind::Expense => outflows += tx.amount_paid,
        }
        by_category.add(tx.category_id, tx.kind, tx.amount_paid);
    }

    let moved: Vec<&Transfer> = transfers.iter().filter(|t| period.contains(t.date)).collect();

    CashFlowReport {
        period,
        inflows: round_cents(inflows),
        outflows: round_cents(outflows),
        net: round_cents(inflows - outflows),
        by_category: by_category.finish(),
        transfer_count: moved.len(),
        transfer_total: round_cents(moved.iter().map(|t| t.amount).sum()),
    }
}

// ============================================================================
// PROFIT & LOSS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitAndLoss {
    pub period: Period,
    pub revenue: f64,
    pub cost_of_goods: f64,
    pub gross_profit: f64,
    pub operating_expenses: f64,
    pub net_profit: f64,
    pub by_category: Vec<CategoryLine>,
}

/// Accrual basis: document totals, paid or not
pub fn profit_and_loss(
    transactions: &[Transaction],
    categories: &[AccountCategory],
    period: Period,
) -> ProfitAndLoss {
    let mut revenue = 0.0;
    let mut cost_of_goods = 0.0;
    let mut operating_expenses = 0.0;
    let mut by_category = CategoryTotals::new(categories);

    for tx in live(transactions, period) {
        match tx.kind {
            TransactionKind::Income => revenue += tx.total,
            TransactionKind::Expense if tx.is_bill() => cost_of_goods += tx.total,
            TransactionKind::Expense => operating_expenses += tx.total,
        }
        by_category.add(tx.category_id, tx.kind, tx.total);
    }

    let gross_profit = revenue - cost_of_goods;
    ProfitAndLoss {
        period,
        revenue: round_cents(revenue),
        cost_of_goods: round_cents(cost_of_goods),
        gross_profit: round_cents(gross_profit),
        operating_expenses: round_cents(operating_expenses),
        net_profit: round_cents(gross_profit - operating_expenses),
        by_category: by_category.finish(),
    }
}

// ============================================================================
// BALANCE SHEET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub account_id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub cash_and_bank: f64,
    pub receivables: f64,
    pub inventory: f64,
    pub total_assets: f64,
    pub credit_and_loans: f64,
    pub payables: f64,
    pub total_liabilities: f64,
    pub equity: f64,
    pub accounts: Vec<AccountBalance>,
}

/// Account balances are rebuilt from opening balance plus every payment and
/// transfer dated on or before `as_of`. Inventory uses current stock.
pub fn balance_sheet(
    accounts: &[Account],
    transactions: &[Transaction],
    transfers: &[Transfer],
    products: &[Product],
    as_of: NaiveDate,
) -> BalanceSheet {
    let until = Period::new(None, Some(as_of));

    let mut balances: Vec<AccountBalance> = accounts
        .iter()
        .map(|a| AccountBalance {
            account_id: a.id,
            name: a.name.clone(),
            account_type: a.account_type,
            balance: a.opening_balance,
        })
        .collect();

    let mut credit = |account_id: i64, delta: f64| {
        if let Some(b) = balances.iter_mut().find(|b| b.account_id == account_id) {
            b.balance += delta;
        }
    };

    let mut receivables = 0.0;
    let mut payables = 0.0;
    for tx in live(transactions, until) {
        if let Some(account_id) = tx.account_id {
            credit(account_id, tx.cash_effect());
        }
        match tx.kind {
            TransactionKind::Income => receivables += tx.balance_due(),
            TransactionKind::Expense => payables += tx.balance_due(),
        }
    }
    for t in transfers.iter().filter(|t| until.contains(t.date)) {
        credit(t.from_account_id, -t.amount);
        credit(t.to_account_id, t.amount);
    }

    for b in balances.iter_mut() {
        b.balance = round_cents(b.balance);
    }

    let cash_and_bank: f64 = balances
        .iter()
        .filter(|b| b.account_type.is_asset())
        .map(|b| b.balance)
        .sum();
    let credit_and_loans: f64 = balances
        .iter()
        .filter(|b| b.account_type.is_liability())
        .map(|b| b.balance.abs())
        .sum();
    let inventory: f64 = products.iter().map(|p| p.inventory_value()).sum();

    let total_assets = cash_and_bank + receivables + inventory;
    let total_liabilities = credit_and_loans + payables;

    BalanceSheet {
        as_of,
        cash_and_bank: round_cents(cash_and_bank),
        receivables: round_cents(receivables),
        inventory: round_cents(inventory),
        total_assets: round_cents(total_assets),
        credit_and_loans: round_cents(credit_and_loans),
        payables: round_cents(payables),
        total_liabilities: round_cents(total_liabilities),
        equity: round_cents(total_assets - total_liabilities),
        accounts: balances,
    }
}

// ============================================================================
// ANALYTICS
// ============================================================================

pub const TOP_PRODUCTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPoint {
    /// `YYYY-MM`
    pub month: String,
    pub revenue: f64,
    pub expenses: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: i64,
    pub name: String,
    pub quantity: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStock {
    pub product_id: i64,
    pub name: String,
    pub stock_quantity: f64,
    pub reorder_level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub revenue: f64,
    pub expenses: f64,
    pub profit: f64,
    pub monthly: Vec<MonthlyPoint>,
    pub top_products: Vec<ProductSales>,
    pub receivables: f64,
    pub payables: f64,
    pub low_stock: Vec<LowStock>,
}

pub fn analytics(transactions: &[Transaction], products: &[Product]) -> Analytics {
    let mut revenue = 0.0;
    let mut expenses = 0.0;
    let mut receivables = 0.0;
    let mut payables = 0.0;
    let mut months: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    let mut sales: BTreeMap<i64, (f64, f64)> = BTreeMap::new();

    for tx in live(transactions, Period::default()) {
        let month = months
            .entry(tx.date.format("%Y-%m").to_string())
            .or_insert((0.0, 0.0));
        match tx.kind {
            TransactionKind::Income => {
                revenue += tx.total;
                receivables += tx.balance_due();
                month.0 += tx.total;
            }
            TransactionKind::Expense => {
                expenses += tx.total;
                payables += tx.balance_due();
                month.1 += tx.total;
            }
        }

        if tx.is_invoice() {
            for item in &tx.items {
                if let Some(product_id) = item.product_id {
                    let entry = sales.entry(product_id).or_insert((0.0, 0.0));
                    entry.0 += item.quantity;
                    entry.1 += item.amount();
                }
            }
        }
    }

    let monthly = months
        .into_iter()
        .map(|(month, (revenue, expenses))| MonthlyPoint {
            month,
            revenue: round_cents(revenue),
            expenses: round_cents(expenses),
            profit: round_cents(revenue - expenses),
        })
        .collect();

    let mut top_products: Vec<ProductSales> = sales
        .into_iter()
        .map(|(product_id, (quantity, amount))| ProductSales {
            product_id,
            name: products
                .iter()
                .find(|p| p.id == product_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("Product {}", product_id)),
            quantity,
            revenue: round_cents(amount),
        })
        .collect();
    // Stable sort keeps ascending product id among ties
    top_products.sort_by(|a, b| b.quantity.total_cmp(&a.quantity));
    top_products.truncate(TOP_PRODUCTS);

    let low_stock = products
        .iter()
        .filter(|p| p.is_low_stock())
        .map(|p| LowStock {
            product_id: p.id,
            name: p.name.clone(),
            stock_quantity: p.stock_quantity,
            reorder_level: p.reorder_level,
        })
        .collect();

    Analytics {
        revenue: round_cents(revenue),
        expenses: round_cents(expenses),
        profit: round_cents(revenue - expenses),
        monthly,
        top_products,
        receivables: round_cents(receivables),
        payables: round_cents(payables),
        low_stock,
    }
}
