pub mod evaluator;

use crate::{
    entities::commerce::{
        coupon, coupon_category, coupon_product, coupon_redemption, Coupon, CouponCategory,
        CouponModel, CouponProduct, CouponRedemption, CouponRedemptionModel, CouponType,
        DiscountType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::clock::Clock,
};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use evaluator::{CartLine, CouponRules, Discount, Evaluation, RejectionReason, Scope};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Input for creating a coupon.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Option<Decimal>,
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    pub coupon_type: Option<CouponType>,
    pub owner_id: Option<Uuid>,
    #[validate(custom = "validate_non_negative")]
    pub min_purchase_amount: Option<Decimal>,
    /// Omit for an unlimited coupon
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[serde(default)]
    pub first_time_only: bool,
    pub applicable_product_ids: Option<Vec<i64>>,
    pub applicable_category_ids: Option<Vec<i64>>,
}

/// Partial update; absent fields are left unchanged, scope lists replace the stored ones.
///
/// `owner_id`, `min_purchase_amount` and `usage_limit` accept an explicit
/// `null` to clear the stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateCouponInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Decimal>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub coupon_type: Option<CouponType>,
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<Uuid>, nullable)]
    pub owner_id: Option<Option<Uuid>>,
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, nullable)]
    pub min_purchase_amount: Option<Option<Decimal>>,
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<i32>, nullable, minimum = 1)]
    pub usage_limit: Option<Option<i32>>,
    pub first_time_only: Option<bool>,
    pub applicable_product_ids: Option<Vec<i64>>,
    pub applicable_category_ids: Option<Vec<i64>>,
}

/// Order-commit redemption request.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct RedeemCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub order_id: Uuid,
    pub customer_id: Option<Uuid>,
    #[validate(custom = "validate_non_negative")]
    pub discount_amount: Option<Decimal>,
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn deserialize_nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("amount must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// A stored coupon together with its scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CouponDetails {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Option<Decimal>,
    pub expiry_date: DateTime<Utc>,
    pub coupon_type: CouponType,
    pub owner_id: Option<Uuid>,
    pub min_purchase_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub times_used: i32,
    pub first_time_only: bool,
    pub applicable_product_ids: Vec<i64>,
    pub applicable_category_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponDetails {
    fn from_parts(model: CouponModel, scope: &Scope) -> Self {
        Self {
            id: model.id,
            name: model.name,
            code: model.code,
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            expiry_date: model.expiry_date,
            coupon_type: model.coupon_type,
            owner_id: model.owner_id,
            min_purchase_amount: model.min_purchase_amount,
            usage_limit: model.usage_limit,
            times_used: model.times_used,
            first_time_only: model.first_time_only,
            applicable_product_ids: scope.product_ids(),
            applicable_category_ids: scope.category_ids(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    /// Rule view consumed by the evaluator.
    pub fn rules(&self) -> CouponRules {
        let discount = match self.discount_type {
            DiscountType::Percentage => {
                Discount::Percentage(self.discount_value.unwrap_or_default())
            }
            DiscountType::FixedAmount => {
                Discount::FixedAmount(self.discount_value.unwrap_or_default())
            }
            DiscountType::FreeShipping => Discount::FreeShipping,
        };
        CouponRules {
            code: self.code.clone(),
            discount,
            expiry_date: self.expiry_date,
            usage_limit: self.usage_limit,
            times_used: self.times_used,
            first_time_only: self.first_time_only,
            min_purchase_amount: self.min_purchase_amount,
            scope: Scope::from_sets(
                self.applicable_product_ids.iter().copied().collect(),
                self.applicable_category_ids.iter().copied().collect(),
            ),
        }
    }
}

/// Outcome of `GET /coupons/validate/{code}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponValidation {
    pub coupon: CouponDetails,
    /// Present when the code was checked against a cart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponPage {
    pub items: Vec<CouponDetails>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Redemptions of one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageStatistic {
    pub date: NaiveDate,
    pub count: u64,
}

/// Trims and upper-cases a coupon code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Moves a midnight expiry to the last second of that day.
pub fn normalize_expiry(expiry: DateTime<Utc>) -> DateTime<Utc> {
    if expiry.num_seconds_from_midnight() == 0 && expiry.nanosecond() == 0 {
        expiry + Duration::seconds(86_399)
    } else {
        expiry
    }
}

fn check_discount_value(
    discount_type: DiscountType,
    value: Option<Decimal>,
) -> Result<Option<Decimal>, ServiceError> {
    match discount_type {
        DiscountType::Percentage => match value {
            Some(v) if v > Decimal::ZERO && v <= Decimal::ONE_HUNDRED => Ok(Some(v)),
            _ => Err(ServiceError::ValidationError(
                "discount_value must be greater than 0 and at most 100 for PERCENTAGE coupons"
                    .to_string(),
            )),
        },
        DiscountType::FixedAmount => match value {
            Some(v) if v > Decimal::ZERO => Ok(Some(v)),
            _ => Err(ServiceError::ValidationError(
                "discount_value must be greater than 0 for FIXED_AMOUNT coupons".to_string(),
            )),
        },
        DiscountType::FreeShipping => Ok(None),
    }
}

fn usage_per_day(rows: &[CouponRedemptionModel]) -> Vec<UsageStatistic> {
    let mut days: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for row in rows {
        *days.entry(row.redeemed_at.date_naive()).or_default() += 1;
    }
    days.into_iter()
        .map(|(date, count)| UsageStatistic { date, count })
        .collect()
}

async fn load_scopes<C: ConnectionTrait>(
    conn: &C,
    coupon_ids: &[Uuid],
) -> Result<HashMap<Uuid, Scope>, ServiceError> {
    if coupon_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let products = CouponProduct::find()
        .filter(coupon_product::Column::CouponId.is_in(coupon_ids.iter().copied()))
        .all(conn)
        .await?;
    let categories = CouponCategory::find()
        .filter(coupon_category::Column::CouponId.is_in(coupon_ids.iter().copied()))
        .all(conn)
        .await?;

    let mut sets: HashMap<Uuid, (BTreeSet<i64>, BTreeSet<i64>)> = HashMap::new();
    for row in products {
        sets.entry(row.coupon_id).or_default().0.insert(row.product_id);
    }
    for row in categories {
        sets.entry(row.coupon_id).or_default().1.insert(row.category_id);
    }

    Ok(sets
        .into_iter()
        .map(|(id, (products, categories))| (id, Scope::from_sets(products, categories)))
        .collect())
}

async fn replace_scope<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    product_ids: Option<&[i64]>,
    category_ids: Option<&[i64]>,
) -> Result<(), ServiceError> {
    if let Some(ids) = product_ids {
        CouponProduct::delete_many()
            .filter(coupon_product::Column::CouponId.eq(coupon_id))
            .exec(conn)
            .await?;
        let rows: Vec<coupon_product::ActiveModel> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|product_id| coupon_product::ActiveModel {
                coupon_id: Set(coupon_id),
                product_id: Set(product_id),
            })
            .collect();
        if !rows.is_empty() {
            CouponProduct::insert_many(rows)
                .exec_without_returning(conn)
                .await?;
        }
    }

    if let Some(ids) = category_ids {
        CouponCategory::delete_many()
            .filter(coupon_category::Column::CouponId.eq(coupon_id))
            .exec(conn)
            .await?;
        let rows: Vec<coupon_category::ActiveModel> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|category_id| coupon_category::ActiveModel {
                coupon_id: Set(coupon_id),
                category_id: Set(category_id),
            })
            .collect();
        if !rows.is_empty() {
            CouponCategory::insert_many(rows)
                .exec_without_returning(conn)
                .await?;
        }
    }

    Ok(())
}

async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<CouponModel>, ServiceError> {
    Ok(Coupon::find()
        .filter(coupon::Column::Code.eq(normalize_code(code)))
        .one(conn)
        .await?)
}

/// Whether the customer has redeemed any coupon before.
async fn has_prior_redemption<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
) -> Result<bool, ServiceError> {
    let count = CouponRedemption::find()
        .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
        .count(conn)
        .await?;
    Ok(count > 0)
}

/// Coupon administration, evaluation and redemption backed by the database.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    clock: Arc<dyn Clock>,
}

impl CouponService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            event_sender,
            clock,
        }
    }

    async fn details<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: CouponModel,
    ) -> Result<CouponDetails, ServiceError> {
        let scopes = load_scopes(conn, &[model.id]).await?;
        let scope = scopes.get(&model.id).cloned().unwrap_or_default();
        Ok(CouponDetails::from_parts(model, &scope))
    }

    /// Creates a coupon and its scope rows.
    ///
    /// Codes are stored normalized and must be unique; a midnight expiry is
    /// extended to the end of that day.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<CouponDetails, ServiceError> {
        input.validate()?;
        let code = normalize_code(&input.code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "code must not be blank".to_string(),
            ));
        }
        let discount_value = check_discount_value(input.discount_type, input.discount_value)?;

        let txn = self.db.begin().await?;

        if find_by_code(&txn, &code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = self.clock.now();
        let coupon_id = Uuid::new_v4();
        let model = coupon::ActiveModel {
            id: Set(coupon_id),
            name: Set(input.name.trim().to_string()),
            code: Set(code),
            discount_type: Set(input.discount_type),
            discount_value: Set(discount_value),
            expiry_date: Set(normalize_expiry(input.expiry_date)),
            coupon_type: Set(input.coupon_type.unwrap_or_default()),
            owner_id: Set(input.owner_id),
            min_purchase_amount: Set(input.min_purchase_amount),
            usage_limit: Set(input.usage_limit),
            times_used: Set(0),
            first_time_only: Set(input.first_time_only),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        replace_scope(
            &txn,
            coupon_id,
            Some(input.applicable_product_ids.as_deref().unwrap_or_default()),
            Some(input.applicable_category_ids.as_deref().unwrap_or_default()),
        )
        .await?;

        let details = self.details(&txn, model).await?;
        txn.commit().await?;

        counter!("coupons.created", 1);
        self.event_sender
            .send_or_log(Event::CouponCreated(coupon_id))
            .await;

        info!(coupon_id = %coupon_id, "Created coupon");
        Ok(details)
    }

    #[instrument(skip(self, input))]
    pub async fn update_coupon(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<CouponDetails, ServiceError> {
        input.validate()?;
        if let Some(Some(min)) = input.min_purchase_amount {
            if min.is_sign_negative() {
                return Err(ServiceError::ValidationError(
                    "min_purchase_amount must not be negative".to_string(),
                ));
            }
        }
        if let Some(Some(limit)) = input.usage_limit {
            if limit < 1 {
                return Err(ServiceError::ValidationError(
                    "usage_limit must be at least 1".to_string(),
                ));
            }
        }

        let txn = self.db.begin().await?;

        let existing = Coupon::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))?;

        let discount_type = input.discount_type.unwrap_or(existing.discount_type);
        let discount_value = check_discount_value(
            discount_type,
            input.discount_value.or(existing.discount_value),
        )?;

        let mut model: coupon::ActiveModel = existing.into();

        if let Some(code) = input.code.as_deref() {
            let code = normalize_code(code);
            if code.is_empty() {
                return Err(ServiceError::ValidationError(
                    "code must not be blank".to_string(),
                ));
            }
            if let Some(other) = find_by_code(&txn, &code).await? {
                if other.id != id {
                    return Err(ServiceError::Conflict(format!(
                        "Coupon code {} already exists",
                        code
                    )));
                }
            }
            model.code = Set(code);
        }
        if let Some(name) = input.name {
            model.name = Set(name.trim().to_string());
        }
        if let Some(expiry) = input.expiry_date {
            model.expiry_date = Set(normalize_expiry(expiry));
        }
        if let Some(coupon_type) = input.coupon_type {
            model.coupon_type = Set(coupon_type);
        }
        if let Some(owner_id) = input.owner_id {
            model.owner_id = Set(owner_id);
        }
        if let Some(min) = input.min_purchase_amount {
            model.min_purchase_amount = Set(min);
        }
        if let Some(limit) = input.usage_limit {
            model.usage_limit = Set(limit);
        }
        if let Some(first_time_only) = input.first_time_only {
            model.first_time_only = Set(first_time_only);
        }
        model.discount_type = Set(discount_type);
        model.discount_value = Set(discount_value);
        model.updated_at = Set(self.clock.now());

        let model = model.update(&txn).await?;

        replace_scope(
            &txn,
            id,
            input.applicable_product_ids.as_deref(),
            input.applicable_category_ids.as_deref(),
        )
        .await?;

        let details = self.details(&txn, model).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CouponUpdated(id)).await;

        info!(coupon_id = %id, "Updated coupon");
        Ok(details)
    }

    #[instrument(skip(self))]
    pub async fn get_coupon(&self, id: Uuid) -> Result<CouponDetails, ServiceError> {
        let model = Coupon::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))?;
        self.details(&*self.db, model).await
    }

    /// Lists coupons newest first. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_coupons(&self, page: u64, per_page: u64) -> Result<CouponPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = Coupon::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page - 1).await?;

        let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
        let scopes = load_scopes(&*self.db, &ids).await?;
        let items = models
            .into_iter()
            .map(|m| {
                let scope = scopes.get(&m.id).cloned().unwrap_or_default();
                CouponDetails::from_parts(m, &scope)
            })
            .collect();

        Ok(CouponPage {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Deletes a coupon. Its redemptions are kept with the coupon reference cleared.
    #[instrument(skip(self))]
    pub async fn delete_coupon(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        if Coupon::find_by_id(id).one(&txn).await?.is_none() {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }

        CouponRedemption::update_many()
            .col_expr(
                coupon_redemption::Column::CouponId,
                Expr::value(Option::<Uuid>::None),
            )
            .filter(coupon_redemption::Column::CouponId.eq(id))
            .exec(&txn)
            .await?;
        CouponProduct::delete_many()
            .filter(coupon_product::Column::CouponId.eq(id))
            .exec(&txn)
            .await?;
        CouponCategory::delete_many()
            .filter(coupon_category::Column::CouponId.eq(id))
            .exec(&txn)
            .await?;
        Coupon::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CouponDeleted(id)).await;

        info!(coupon_id = %id, "Deleted coupon");
        Ok(())
    }

    /// Looks a code up and applies the code-level rules (expiry and usage
    /// limit). With `items` the cart rules are applied as well and a rejected
    /// evaluation becomes an error.
    #[instrument(skip(self, items))]
    pub async fn validate_code(
        &self,
        code: &str,
        items: Option<&[CartLine]>,
    ) -> Result<CouponValidation, ServiceError> {
        let model = find_by_code(&*self.db, code)
            .await?
            .ok_or(ServiceError::CouponRejected(RejectionReason::NotFound))?;
        let coupon = self.details(&*self.db, model).await?;
        let now = self.clock.now();

        let evaluation = match items {
            None => {
                coupon.rules().check_redeemable(now)?;
                None
            }
            Some(items) => {
                let evaluation = evaluator::evaluate(&coupon.rules(), items, now);
                if let Some(reason) = evaluation.reason {
                    return Err(ServiceError::CouponRejected(reason));
                }
                Some(evaluation)
            }
        };

        Ok(CouponValidation { coupon, evaluation })
    }

    /// Evaluates a code against a cart. Rejections are returned as an
    /// invalid [`Evaluation`], not as errors.
    ///
    /// With `customer_id` a first-time-only coupon is refused once the
    /// customer has a recorded coupon redemption. Orders placed without any
    /// coupon are not visible here and do not count as prior orders.
    #[instrument(skip(self, items))]
    pub async fn evaluate_code(
        &self,
        code: &str,
        items: &[CartLine],
        customer_id: Option<Uuid>,
    ) -> Result<Evaluation, ServiceError> {
        let evaluation = match find_by_code(&*self.db, code).await? {
            None => Evaluation::rejected(RejectionReason::NotFound),
            Some(model) => {
                let coupon = self.details(&*self.db, model).await?;
                let now = self.clock.now();
                match customer_id {
                    Some(customer_id) => {
                        let first_order = !has_prior_redemption(&*self.db, customer_id).await?;
                        evaluator::evaluate_for_customer(
                            &coupon.rules(),
                            items,
                            now,
                            first_order,
                        )
                    }
                    None => evaluator::evaluate(&coupon.rules(), items, now),
                }
            }
        };

        let outcome = evaluation.reason.map(|r| r.code()).unwrap_or("applied");
        counter!("coupons.evaluations", 1, "outcome" => outcome);

        Ok(evaluation)
    }

    /// Records the use of a coupon by a committed order.
    ///
    /// The usage counter is bumped with a single conditional UPDATE so that
    /// concurrent redemptions never push `times_used` past `usage_limit`.
    /// The first-time-only check sees earlier coupon redemptions only, not
    /// orders that used no coupon.
    #[instrument(skip(self, input), fields(order_id = %input.order_id))]
    pub async fn redeem(
        &self,
        input: RedeemCouponInput,
    ) -> Result<CouponRedemptionModel, ServiceError> {
        input.validate()?;
        let code = normalize_code(&input.code);

        let txn = self.db.begin().await?;

        let coupon = find_by_code(&txn, &code)
            .await?
            .ok_or(ServiceError::CouponRejected(RejectionReason::NotFound))?;

        let duplicate = CouponRedemption::find()
            .filter(coupon_redemption::Column::OrderId.eq(input.order_id))
            .one(&txn)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Order {} already redeemed a coupon",
                input.order_id
            )));
        }

        if let Some(customer_id) = input.customer_id {
            if coupon.first_time_only && has_prior_redemption(&txn, customer_id).await? {
                counter!("coupons.redemptions.rejected", 1, "reason" => RejectionReason::FirstTimeOnly.code());
                return Err(ServiceError::CouponRejected(RejectionReason::FirstTimeOnly));
            }
        }

        let now = self.clock.now();
        let updated = Coupon::update_many()
            .col_expr(
                coupon::Column::TimesUsed,
                Expr::col(coupon::Column::TimesUsed).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(coupon::Column::ExpiryDate.gt(now))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::TimesUsed)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            let current = Coupon::find_by_id(coupon.id)
                .one(&txn)
                .await?
                .unwrap_or(coupon);
            let reason = if now >= current.expiry_date {
                RejectionReason::Expired
            } else {
                RejectionReason::UsageLimitReached
            };
            warn!(code = %current.code, reason = reason.code(), "coupon redemption refused");
            counter!("coupons.redemptions.rejected", 1, "reason" => reason.code());
            return Err(ServiceError::CouponRejected(reason));
        }

        let redemption = coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(Some(coupon.id)),
            code: Set(coupon.code.clone()),
            order_id: Set(input.order_id),
            customer_id: Set(input.customer_id),
            discount_amount: Set(input.discount_amount),
            redeemed_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        counter!("coupons.redemptions", 1);
        self.event_sender
            .send_or_log(Event::CouponRedeemed {
                coupon_id: coupon.id,
                order_id: input.order_id,
                customer_id: input.customer_id,
                discount_amount: input.discount_amount,
            })
            .await;

        info!(coupon_id = %coupon.id, "Redeemed coupon");
        Ok(redemption)
    }

    /// Redemptions of all coupons per UTC day, oldest first.
    #[instrument(skip(self))]
    pub async fn usage_statistics(&self) -> Result<Vec<UsageStatistic>, ServiceError> {
        let rows = CouponRedemption::find()
            .order_by_asc(coupon_redemption::Column::RedeemedAt)
            .all(&*self.db)
            .await?;
        Ok(usage_per_day(&rows))
    }

    /// Redemptions of one coupon per UTC day; empty for an unknown coupon.
    #[instrument(skip(self))]
    pub async fn usage_statistics_for(
        &self,
        coupon_id: Uuid,
    ) -> Result<Vec<UsageStatistic>, ServiceError> {
        let rows = CouponRedemption::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon_id))
            .order_by_asc(coupon_redemption::Column::RedeemedAt)
            .all(&*self.db)
            .await?;
        Ok(usage_per_day(&rows))
    }

    /// Coupons owned by the user that can still be redeemed.
    #[instrument(skip(self))]
    pub async fn active_coupons_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CouponDetails>, ServiceError> {
        let now = self.clock.now();
        let models = Coupon::find()
            .filter(coupon::Column::OwnerId.eq(user_id))
            .filter(coupon::Column::ExpiryDate.gt(now))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::TimesUsed)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .order_by_asc(coupon::Column::ExpiryDate)
            .all(&*self.db)
            .await?;

        let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
        let scopes = load_scopes(&*self.db, &ids).await?;
        Ok(models
            .into_iter()
            .map(|m| {
                let scope = scopes.get(&m.id).cloned().unwrap_or_default();
                CouponDetails::from_parts(m, &scope)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn codes_are_trimmed_and_upper_cased() {
        assert_eq!(normalize_code("  summer10 "), "SUMMER10");
        assert_eq!(normalize_code("Save-5"), "SAVE-5");
    }

    #[test]
    fn update_input_tells_null_from_absent() {
        let input: UpdateCouponInput =
            serde_json::from_value(serde_json::json!({ "usage_limit": null, "name": "x" }))
                .unwrap();
        assert_eq!(input.usage_limit, Some(None));
        assert_eq!(input.min_purchase_amount, None);
        assert_eq!(input.owner_id, None);

        let input: UpdateCouponInput =
            serde_json::from_value(serde_json::json!({ "min_purchase_amount": "20" })).unwrap();
        assert_eq!(input.min_purchase_amount, Some(Some(dec!(20))));
    }

    #[test]
    fn midnight_expiry_moves_to_end_of_day() {
        let midnight = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        assert_eq!(
            normalize_expiry(midnight),
            Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap()
        );

        let afternoon = Utc.with_ymd_and_hms(2025, 6, 30, 15, 0, 0).unwrap();
        assert_eq!(normalize_expiry(afternoon), afternoon);
    }

    #[test]
    fn discount_value_rules_follow_discount_type() {
        assert_eq!(
            check_discount_value(DiscountType::Percentage, Some(dec!(100))).unwrap(),
            Some(dec!(100))
        );
        assert_matches!(
            check_discount_value(DiscountType::Percentage, Some(dec!(100.01))),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            check_discount_value(DiscountType::Percentage, None),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            check_discount_value(DiscountType::FixedAmount, Some(dec!(0))),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(
            check_discount_value(DiscountType::FreeShipping, Some(dec!(5))).unwrap(),
            None
        );
    }

    #[test]
    fn usage_is_grouped_by_utc_day_in_order() {
        let row = |day: u32, hour: u32| CouponRedemptionModel {
            id: Uuid::new_v4(),
            coupon_id: None,
            code: "X".into(),
            order_id: Uuid::new_v4(),
            customer_id: None,
            discount_amount: None,
            redeemed_at: Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap(),
        };
        let stats = usage_per_day(&[row(2, 23), row(1, 8), row(2, 0), row(1, 9), row(5, 12)]);

        let days: Vec<(String, u64)> = stats
            .iter()
            .map(|s| (s.date.to_string(), s.count))
            .collect();
        assert_eq!(
            days,
            vec![
                ("2025-03-01".to_string(), 2),
                ("2025-03-02".to_string(), 2),
                ("2025-03-05".to_string(), 1),
            ]
        );
    }

    #[test]
    fn details_convert_to_rules() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let details = CouponDetails {
            id: Uuid::new_v4(),
            name: "Spring".into(),
            code: "SPRING".into(),
            discount_type: DiscountType::Percentage,
            discount_value: Some(dec!(10)),
            expiry_date: now + Duration::days(1),
            coupon_type: CouponType::User,
            owner_id: None,
            min_purchase_amount: None,
            usage_limit: Some(3),
            times_used: 1,
            first_time_only: false,
            applicable_product_ids: vec![42],
            applicable_category_ids: vec![],
            created_at: now,
            updated_at: now,
        };

        let rules = details.rules();
        assert_eq!(rules.discount, Discount::Percentage(dec!(10)));
        assert_eq!(rules.scope, Scope::Products([42].into_iter().collect()));
        assert!(rules.is_active(now));
    }
}
