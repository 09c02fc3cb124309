//! Coupon eligibility and discount calculation.
//!
//! Everything in this module is pure: the caller supplies the coupon rules,
//! the cart lines and the current time, and gets back an [`Evaluation`].
//! Persisting `times_used` happens elsewhere, at order commit.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

pub type ProductId = i64;
pub type CategoryId = i64;

/// The products and categories a coupon applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Unrestricted,
    Products(BTreeSet<ProductId>),
    Categories(BTreeSet<CategoryId>),
    Both {
        products: BTreeSet<ProductId>,
        categories: BTreeSet<CategoryId>,
    },
}

impl Scope {
    /// Builds a scope from possibly-empty id sets; an empty set does not restrict.
    pub fn from_sets(products: BTreeSet<ProductId>, categories: BTreeSet<CategoryId>) -> Self {
        match (products.is_empty(), categories.is_empty()) {
            (true, true) => Scope::Unrestricted,
            (false, true) => Scope::Products(products),
            (true, false) => Scope::Categories(categories),
            (false, false) => Scope::Both {
                products,
                categories,
            },
        }
    }

    /// Product and category restrictions must both hold; a line without a
    /// category never satisfies a category restriction.
    pub fn matches(&self, line: &CartLine) -> bool {
        let in_categories = |ids: &BTreeSet<CategoryId>| {
            line.category_id
                .map_or(false, |category_id| ids.contains(&category_id))
        };

        match self {
            Scope::Unrestricted => true,
            Scope::Products(ids) => ids.contains(&line.product_id),
            Scope::Categories(ids) => in_categories(ids),
            Scope::Both {
                products,
                categories,
            } => products.contains(&line.product_id) && in_categories(categories),
        }
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        match self {
            Scope::Products(ids) | Scope::Both { products: ids, .. } => {
                ids.iter().copied().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn category_ids(&self) -> Vec<CategoryId> {
        match self {
            Scope::Categories(ids) | Scope::Both { categories: ids, .. } => {
                ids.iter().copied().collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discount {
    /// Percent of the scoped subtotal, 0 < value <= 100
    Percentage(Decimal),
    /// Flat amount off the order
    FixedAmount(Decimal),
    FreeShipping,
}

/// The eligibility rules of a single coupon.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponRules {
    pub code: String,
    pub discount: Discount,
    pub expiry_date: DateTime<Utc>,
    /// `None` means unlimited
    pub usage_limit: Option<i32>,
    pub times_used: i32,
    pub first_time_only: bool,
    pub min_purchase_amount: Option<Decimal>,
    pub scope: Scope,
}

impl CouponRules {
    /// Code-level checks that need no cart: expiry first, then usage.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), RejectionReason> {
        if now >= self.expiry_date {
            return Err(RejectionReason::Expired);
        }

        if let Some(limit) = self.usage_limit {
            if self.times_used >= limit {
                return Err(RejectionReason::UsageLimitReached);
            }
        }

        Ok(())
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.check_redeemable(now).is_ok()
    }
}

/// Largest unit price a cart line may carry (1e12).
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Most lines a single cart may hold.
pub const MAX_CART_LINES: usize = 500;

/// A cart line as seen by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct CartLine {
    pub product_id: ProductId,
    pub category_id: Option<CategoryId>,
    #[validate(custom = "validate_price")]
    #[schema(value_type = String, example = "19.99")]
    pub price: Decimal,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.price.saturating_mul(Decimal::from(self.quantity))
    }
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        let mut err = ValidationError::new("price");
        err.message = Some("price must not be negative".into());
        return Err(err);
    }
    if *price > MAX_UNIT_PRICE {
        let mut err = ValidationError::new("price");
        err.message = Some(format!("price must not exceed {}", MAX_UNIT_PRICE).into());
        return Err(err);
    }
    Ok(())
}

/// Why a coupon was rejected.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectionReason {
    Expired,
    UsageLimitReached,
    NotApplicable,
    MinPurchaseNotMet,
    NotFound,
    FirstTimeOnly,
}

impl RejectionReason {
    /// Stable machine-readable code, identical to the serialized form.
    pub fn code(self) -> &'static str {
        self.into()
    }

    pub fn message(self) -> &'static str {
        match self {
            RejectionReason::Expired => "Coupon has expired",
            RejectionReason::UsageLimitReached => "Coupon has reached its usage limit",
            RejectionReason::NotApplicable => "Coupon does not apply to any item in the cart",
            RejectionReason::MinPurchaseNotMet => {
                "Cart total does not meet the minimum purchase amount for this coupon"
            }
            RejectionReason::NotFound => "Coupon not found",
            RejectionReason::FirstTimeOnly => "Coupon is for first-time customers only",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of evaluating a coupon against a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Evaluation {
    pub valid: bool,
    #[schema(value_type = String, example = "25.00")]
    pub discount_amount: Decimal,
    /// Shipping fee is waived; not part of `discount_amount`
    pub free_shipping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
}

impl Evaluation {
    pub fn applied(discount_amount: Decimal, free_shipping: bool) -> Self {
        Self {
            valid: true,
            discount_amount,
            free_shipping,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            valid: false,
            discount_amount: Decimal::ZERO,
            free_shipping: false,
            reason: Some(reason),
        }
    }
}

/// Sum of price x quantity, saturating at [`Decimal::MAX`].
pub fn subtotal<'a>(items: impl IntoIterator<Item = &'a CartLine>) -> Decimal {
    items
        .into_iter()
        .map(CartLine::line_total)
        .fold(Decimal::ZERO, Decimal::saturating_add)
}

/// Evaluates `coupon` against `items` at instant `now`.
///
/// The minimum purchase is compared with the full cart subtotal while a
/// percentage discount is taken from the scoped subtotal.
pub fn evaluate(coupon: &CouponRules, items: &[CartLine], now: DateTime<Utc>) -> Evaluation {
    if let Err(reason) = coupon.check_redeemable(now) {
        return Evaluation::rejected(reason);
    }

    let scoped: Vec<&CartLine> = items
        .iter()
        .filter(|line| coupon.scope.matches(line))
        .collect();
    if scoped.is_empty() {
        return Evaluation::rejected(RejectionReason::NotApplicable);
    }

    let scoped_subtotal = subtotal(scoped.iter().copied());

    if let Some(minimum) = coupon.min_purchase_amount {
        if subtotal(items) < minimum {
            return Evaluation::rejected(RejectionReason::MinPurchaseNotMet);
        }
    }

    match coupon.discount {
        Discount::Percentage(percent) => {
            let amount = (scoped_subtotal.saturating_mul(percent) / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
                .min(scoped_subtotal);
            Evaluation::applied(amount, false)
        }
        Discount::FixedAmount(amount) => Evaluation::applied(amount, false),
        Discount::FreeShipping => Evaluation::applied(Decimal::ZERO, true),
    }
}

/// Like [`evaluate`], and additionally rejects a first-time-only coupon when
/// the customer has ordered before.
pub fn evaluate_for_customer(
    coupon: &CouponRules,
    items: &[CartLine],
    now: DateTime<Utc>,
    first_order: bool,
) -> Evaluation {
    let evaluation = evaluate(coupon, items, now);
    if evaluation.valid && coupon.first_time_only && !first_order {
        return Evaluation::rejected(RejectionReason::FirstTimeOnly);
    }
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn coupon(discount: Discount) -> CouponRules {
        CouponRules {
            code: "SAVE".to_string(),
            discount,
            expiry_date: now() + Duration::days(7),
            usage_limit: Some(10),
            times_used: 0,
            first_time_only: false,
            min_purchase_amount: None,
            scope: Scope::Unrestricted,
        }
    }

    fn line(product_id: i64, category_id: Option<i64>, price: Decimal, quantity: u32) -> CartLine {
        CartLine {
            product_id,
            category_id,
            price,
            quantity,
        }
    }

    #[test]
    fn percentage_discount_uses_scoped_subtotal() {
        let items = vec![line(1, Some(10), dec!(40), 2), line(2, Some(20), dec!(20), 1)];
        let result = evaluate(&coupon(Discount::Percentage(dec!(25))), &items, now());

        assert!(result.valid);
        assert_eq!(result.discount_amount, dec!(25.00));
        assert!(!result.free_shipping);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn percentage_discount_only_counts_matching_lines() {
        let mut rules = coupon(Discount::Percentage(dec!(10)));
        rules.scope = Scope::Categories(BTreeSet::from([10]));
        let items = vec![line(1, Some(10), dec!(50), 1), line(2, Some(20), dec!(500), 1)];

        let result = evaluate(&rules, &items, now());
        assert_eq!(result.discount_amount, dec!(5.00));
    }

    #[test]
    fn percentage_discount_rounds_half_away_from_zero() {
        let items = vec![line(1, None, dec!(0.05), 1)];
        let result = evaluate(&coupon(Discount::Percentage(dec!(50))), &items, now());
        assert_eq!(result.discount_amount, dec!(0.03));
    }

    #[rstest]
    #[case(vec![line(1, None, dec!(1), 1)])]
    #[case(vec![line(1, None, dec!(100), 3), line(2, None, dec!(999.99), 7)])]
    fn fixed_discount_is_flat_regardless_of_cart(#[case] items: Vec<CartLine>) {
        let result = evaluate(&coupon(Discount::FixedAmount(dec!(15))), &items, now());
        assert!(result.valid);
        assert_eq!(result.discount_amount, dec!(15.00));
    }

    #[test]
    fn free_shipping_sets_flag_without_monetary_discount() {
        let items = vec![line(1, None, dec!(30), 1)];
        let result = evaluate(&coupon(Discount::FreeShipping), &items, now());

        assert!(result.valid);
        assert!(result.free_shipping);
        assert_eq!(result.discount_amount, Decimal::ZERO);
    }

    #[rstest]
    #[case(Duration::zero())]
    #[case(Duration::seconds(-1))]
    #[case(Duration::days(-30))]
    fn expired_when_now_reaches_expiry(#[case] offset: Duration) {
        let mut rules = coupon(Discount::Percentage(dec!(10)));
        rules.expiry_date = now() + offset;

        let result = evaluate(&rules, &[line(1, None, dec!(10), 1)], now());
        assert_eq!(result, Evaluation::rejected(RejectionReason::Expired));
    }

    #[test]
    fn expiry_is_checked_before_usage() {
        let mut rules = coupon(Discount::Percentage(dec!(10)));
        rules.expiry_date = now() - Duration::days(1);
        rules.times_used = 10;

        let result = evaluate(&rules, &[line(1, None, dec!(10), 1)], now());
        assert_eq!(result.reason, Some(RejectionReason::Expired));
    }

    #[rstest]
    #[case(10, 10)]
    #[case(1, 3)]
    fn usage_limit_reached(#[case] limit: i32, #[case] used: i32) {
        let mut rules = coupon(Discount::FixedAmount(dec!(5)));
        rules.usage_limit = Some(limit);
        rules.times_used = used;

        let result = evaluate(&rules, &[line(1, None, dec!(10), 1)], now());
        assert_eq!(result.reason, Some(RejectionReason::UsageLimitReached));
        assert!(!result.valid);
    }

    #[test]
    fn missing_usage_limit_is_unlimited() {
        let mut rules = coupon(Discount::FixedAmount(dec!(5)));
        rules.usage_limit = None;
        rules.times_used = 1_000_000;

        assert!(evaluate(&rules, &[line(1, None, dec!(10), 1)], now()).valid);
    }

    #[test]
    fn product_scope_mismatch_is_not_applicable() {
        let mut rules = coupon(Discount::Percentage(dec!(10)));
        rules.scope = Scope::Products(BTreeSet::from([42]));

        let result = evaluate(&rules, &[line(7, None, dec!(10), 1)], now());
        assert_eq!(result.reason, Some(RejectionReason::NotApplicable));
    }

    #[test]
    fn empty_cart_is_not_applicable() {
        let result = evaluate(&coupon(Discount::FixedAmount(dec!(5))), &[], now());
        assert_eq!(result.reason, Some(RejectionReason::NotApplicable));
    }

    #[test]
    fn both_scope_requires_product_and_category() {
        let scope = Scope::from_sets(BTreeSet::from([1, 2]), BTreeSet::from([10]));

        assert!(scope.matches(&line(1, Some(10), dec!(1), 1)));
        assert!(!scope.matches(&line(1, Some(20), dec!(1), 1)));
        assert!(!scope.matches(&line(3, Some(10), dec!(1), 1)));
        assert!(!scope.matches(&line(2, None, dec!(1), 1)));
    }

    #[test]
    fn scope_from_empty_sets_is_unrestricted() {
        assert_eq!(
            Scope::from_sets(BTreeSet::new(), BTreeSet::new()),
            Scope::Unrestricted
        );
        assert_matches!(
            Scope::from_sets(BTreeSet::from([5]), BTreeSet::new()),
            Scope::Products(ids) if ids.contains(&5)
        );
        assert_matches!(
            Scope::from_sets(BTreeSet::new(), BTreeSet::from([9])),
            Scope::Categories(_)
        );
    }

    #[rstest]
    #[case(dec!(50), false)]
    #[case(dec!(74.99), false)]
    #[case(dec!(75), true)]
    #[case(dec!(120), true)]
    fn minimum_purchase_boundary(#[case] cart_total: Decimal, #[case] valid: bool) {
        let mut rules = coupon(Discount::FixedAmount(dec!(10)));
        rules.min_purchase_amount = Some(dec!(75));

        let result = evaluate(&rules, &[line(1, None, cart_total, 1)], now());
        assert_eq!(result.valid, valid);
        if !valid {
            assert_eq!(result.reason, Some(RejectionReason::MinPurchaseNotMet));
        }
    }

    #[test]
    fn minimum_purchase_counts_out_of_scope_lines() {
        let mut rules = coupon(Discount::Percentage(dec!(10)));
        rules.scope = Scope::Products(BTreeSet::from([1]));
        rules.min_purchase_amount = Some(dec!(75));
        let items = vec![line(1, None, dec!(20), 1), line(2, None, dec!(60), 1)];

        let result = evaluate(&rules, &items, now());
        assert!(result.valid);
        assert_eq!(result.discount_amount, dec!(2.00));
    }

    #[test]
    fn first_time_only_rejects_returning_customer() {
        let mut rules = coupon(Discount::FixedAmount(dec!(10)));
        rules.first_time_only = true;
        let items = [line(1, None, dec!(20), 1)];

        assert!(evaluate_for_customer(&rules, &items, now(), true).valid);
        assert_eq!(
            evaluate_for_customer(&rules, &items, now(), false).reason,
            Some(RejectionReason::FirstTimeOnly)
        );
        assert!(evaluate(&rules, &items, now()).valid);
    }

    #[test]
    fn first_time_only_does_not_mask_earlier_rejection() {
        let mut rules = coupon(Discount::FixedAmount(dec!(10)));
        rules.first_time_only = true;
        rules.times_used = 10;

        let result = evaluate_for_customer(&rules, &[line(1, None, dec!(20), 1)], now(), false);
        assert_eq!(result.reason, Some(RejectionReason::UsageLimitReached));
    }

    #[test]
    fn rejection_codes_are_snake_case() {
        assert_eq!(RejectionReason::MinPurchaseNotMet.code(), "min_purchase_not_met");
        assert_eq!(
            serde_json::to_value(RejectionReason::UsageLimitReached).unwrap(),
            serde_json::json!("usage_limit_reached")
        );
    }

    #[test]
    fn cart_line_validation_rejects_negative_price_and_zero_quantity() {
        assert!(line(1, None, dec!(-1), 1).validate().is_err());
        assert!(line(1, None, dec!(1), 0).validate().is_err());
        assert!(line(1, None, dec!(0), 1).validate().is_ok());
    }

    #[test]
    fn cart_line_validation_caps_unit_price() {
        assert!(line(1, None, MAX_UNIT_PRICE, 10_000).validate().is_ok());
        assert!(line(1, None, MAX_UNIT_PRICE + dec!(0.01), 1).validate().is_err());
        assert!(line(1, None, dec!(70000000000000000000000000000), 2)
            .validate()
            .is_err());
    }

    #[test]
    fn oversized_amounts_saturate_instead_of_overflowing() {
        let huge = dec!(70000000000000000000000000000);
        let items = vec![line(1, None, huge, 2), line(2, None, huge, 1)];

        assert_eq!(subtotal(&items), Decimal::MAX);
        let result = evaluate(&coupon(Discount::Percentage(dec!(100))), &items, now());
        assert!(result.valid);
        assert!(result.discount_amount > Decimal::ZERO);
    }
}
