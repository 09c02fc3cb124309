/*!
 * # Permissions Module
 *
 * Permission strings have the form `resource:action`. A grant of
 * `resource:*` covers every action on that resource and `*` covers everything.
 */

/// Permission actions
pub struct Actions;

impl Actions {
    pub const READ: &'static str = "read";
    pub const CREATE: &'static str = "create";
    pub const UPDATE: &'static str = "update";
    pub const DELETE: &'static str = "delete";
    pub const ANALYTICS: &'static str = "analytics";
    pub const REDEEM: &'static str = "redeem";
    pub const ALL: &'static str = "*";
}

/// Resource types
pub struct Resources;

impl Resources {
    pub const COUPONS: &'static str = "coupons";
    pub const ADMIN: &'static str = "admin";
}

/// Common permission string constants for compile-time safety
pub mod consts {
    pub const COUPONS_READ: &str = "coupons:read";
    pub const COUPONS_CREATE: &str = "coupons:create";
    pub const COUPONS_UPDATE: &str = "coupons:update";
    pub const COUPONS_DELETE: &str = "coupons:delete";
    pub const COUPONS_ANALYTICS: &str = "coupons:analytics";
    /// Held by the order-placement service
    pub const COUPONS_REDEEM: &str = "coupons:redeem";
}

/// Format a permission string
pub fn format_permission(resource: &str, action: &str) -> String {
    format!("{}:{}", resource, action)
}

/// Check if a granted permission covers the required one
pub fn is_permission_implied(granted: &str, required: &str) -> bool {
    if granted == required || granted == Actions::ALL {
        return true;
    }

    match (granted.split_once(':'), required.split_once(':')) {
        (Some((granted_resource, granted_action)), Some((required_resource, _))) => {
            granted_action == Actions::ALL
                && (granted_resource == required_resource || granted_resource == Resources::ADMIN)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_grants() {
        assert!(is_permission_implied(consts::COUPONS_READ, consts::COUPONS_READ));
        assert!(is_permission_implied("coupons:*", consts::COUPONS_DELETE));
        assert!(is_permission_implied("admin:*", consts::COUPONS_REDEEM));
        assert!(is_permission_implied("*", consts::COUPONS_ANALYTICS));
    }

    #[test]
    fn unrelated_grants_do_not_match() {
        assert!(!is_permission_implied(consts::COUPONS_READ, consts::COUPONS_UPDATE));
        assert!(!is_permission_implied("orders:*", consts::COUPONS_READ));
        assert!(!is_permission_implied("coupons", consts::COUPONS_READ));
    }

    #[test]
    fn consts_match_formatted_names() {
        assert_eq!(
            format_permission(Resources::COUPONS, Actions::REDEEM),
            consts::COUPONS_REDEEM
        );
        assert_eq!(
            format_permission(Resources::COUPONS, Actions::ANALYTICS),
            consts::COUPONS_ANALYTICS
        );
    }
}
