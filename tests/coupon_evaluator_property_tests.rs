//! Property-based tests for the coupon evaluator.
//!
//! The evaluator is a pure function of the coupon rules, the cart and the
//! current instant, so these properties hold for any generated input.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::services::coupons::evaluator::{
    evaluate, subtotal, CartLine, CouponRules, Discount, RejectionReason, Scope,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000, 0u32..100).prop_map(|(dollars, cents)| {
        Decimal::new(dollars * 100 + i64::from(cents), 2)
    })
}

fn line_strategy() -> impl Strategy<Value = CartLine> {
    (1i64..50, proptest::option::of(1i64..10), price_strategy(), 1u32..20).prop_map(
        |(product_id, category_id, price, quantity)| CartLine {
            product_id,
            category_id,
            price,
            quantity,
        },
    )
}

fn cart_strategy() -> impl Strategy<Value = Vec<CartLine>> {
    proptest::collection::vec(line_strategy(), 1..12)
}

fn scope_strategy() -> impl Strategy<Value = Scope> {
    (
        proptest::collection::btree_set(1i64..50, 0..5),
        proptest::collection::btree_set(1i64..10, 0..3),
    )
        .prop_map(|(products, categories)| Scope::from_sets(products, categories))
}

fn discount_strategy() -> impl Strategy<Value = Discount> {
    prop_oneof![
        (1i64..=10_000).prop_map(|bp| Discount::Percentage(Decimal::new(bp, 2))),
        (1i64..100_000).prop_map(|cents| Discount::FixedAmount(Decimal::new(cents, 2))),
        Just(Discount::FreeShipping),
    ]
}

fn rules(discount: Discount, scope: Scope) -> CouponRules {
    CouponRules {
        code: "PROP".to_string(),
        discount,
        expiry_date: now() + Duration::days(30),
        usage_limit: None,
        times_used: 0,
        first_time_only: false,
        min_purchase_amount: None,
        scope,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn expired_coupons_are_always_rejected(
        discount in discount_strategy(),
        cart in cart_strategy(),
        seconds_past in 0i64..10_000_000,
    ) {
        let mut coupon = rules(discount, Scope::Unrestricted);
        coupon.expiry_date = now() - Duration::seconds(seconds_past);

        let result = evaluate(&coupon, &cart, now());
        prop_assert!(!result.valid);
        prop_assert_eq!(result.reason, Some(RejectionReason::Expired));
    }

    #[test]
    fn exhausted_coupons_are_always_rejected(
        discount in discount_strategy(),
        cart in cart_strategy(),
        limit in 1i32..1000,
        extra in 0i32..10,
    ) {
        let mut coupon = rules(discount, Scope::Unrestricted);
        coupon.usage_limit = Some(limit);
        coupon.times_used = limit + extra;

        let result = evaluate(&coupon, &cart, now());
        prop_assert_eq!(result.reason, Some(RejectionReason::UsageLimitReached));
    }

    #[test]
    fn evaluation_is_idempotent(
        discount in discount_strategy(),
        scope in scope_strategy(),
        cart in cart_strategy(),
    ) {
        let coupon = rules(discount, scope);
        let first = evaluate(&coupon, &cart, now());
        let second = evaluate(&coupon, &cart, now());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn fixed_discount_ignores_cart_size(
        cents in 1i64..100_000,
        cart in cart_strategy(),
    ) {
        let amount = Decimal::new(cents, 2);
        let coupon = rules(Discount::FixedAmount(amount), Scope::Unrestricted);

        let result = evaluate(&coupon, &cart, now());
        prop_assert!(result.valid);
        prop_assert_eq!(result.discount_amount, amount);
    }

    #[test]
    fn percentage_discount_never_exceeds_scoped_subtotal(
        basis_points in 1i64..=10_000,
        scope in scope_strategy(),
        cart in cart_strategy(),
    ) {
        let coupon = rules(Discount::Percentage(Decimal::new(basis_points, 2)), scope.clone());
        let result = evaluate(&coupon, &cart, now());

        let scoped: Vec<&CartLine> = cart.iter().filter(|l| scope.matches(l)).collect();
        if scoped.is_empty() {
            prop_assert_eq!(result.reason, Some(RejectionReason::NotApplicable));
        } else {
            prop_assert!(result.valid);
            prop_assert!(result.discount_amount >= Decimal::ZERO);
            prop_assert!(result.discount_amount <= subtotal(scoped.iter().copied()));
            prop_assert!(result.discount_amount.scale() <= 2);
        }
    }

    #[test]
    fn out_of_scope_carts_are_not_applicable(
        products in proptest::collection::btree_set(100i64..200, 1..5),
        cart in cart_strategy(),
    ) {
        // Generated lines only use product ids below 50
        let coupon = rules(
            Discount::Percentage(Decimal::new(10, 0)),
            Scope::from_sets(products, BTreeSet::new()),
        );
        let result = evaluate(&coupon, &cart, now());
        prop_assert_eq!(result.reason, Some(RejectionReason::NotApplicable));
    }

    #[test]
    fn minimum_purchase_compares_full_subtotal(
        cart in cart_strategy(),
        minimum in price_strategy(),
    ) {
        let mut coupon = rules(Discount::FixedAmount(Decimal::ONE), Scope::Unrestricted);
        coupon.min_purchase_amount = Some(minimum);

        let result = evaluate(&coupon, &cart, now());
        if subtotal(&cart) >= minimum {
            prop_assert!(result.valid);
        } else {
            prop_assert_eq!(result.reason, Some(RejectionReason::MinPurchaseNotMet));
        }
    }
}
