/// Commerce entities module
pub mod coupon;
pub mod coupon_category;
pub mod coupon_product;
pub mod coupon_redemption;

// Re-export entities
pub use coupon::{CouponType, DiscountType, Entity as Coupon, Model as CouponModel};
pub use coupon_category::{Entity as CouponCategory, Model as CouponCategoryModel};
pub use coupon_product::{Entity as CouponProduct, Model as CouponProductModel};
pub use coupon_redemption::{Entity as CouponRedemption, Model as CouponRedemptionModel};
