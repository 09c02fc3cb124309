// Coupon evaluation, administration and redemption
pub mod coupons;

// Guest cart storage
pub mod cart_store;

// Time source
pub mod clock;
