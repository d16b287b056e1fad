use crate::model::{Configuration, LegacyEnvironment, Platform};

/// Maps one legacy environment onto its configuration row.
///
/// `owner_id` is written to both `created_by` and `updated_by`.
pub fn transform(env: &LegacyEnvironment, owner_id: i64) -> Configuration {
    let platform = resolve_platform(env.platform.as_deref());
    Configuration {
        id: env.id,
        organization_id: env.organization_id,
        name: env.name.clone(),
        platform,
        is_kane_supported: env.is_kane_supported,
        is_manual_supported: manual_supported(env.is_kane_supported, platform, env.private_cloud),
        is_default: env.is_default,
        is_custom: env.is_custom,
        is_complete: env.is_complete,
        created_by: owner_id,
        updated_by: owner_id,
        created_at: env.created_at.clone(),
        updated_at: env.updated_at.clone(),
        deleted_at: env.deleted_at.clone(),
    }
}

pub fn resolve_platform(raw: Option<&str>) -> Platform {
    raw.and_then(Platform::from_label).unwrap_or_default()
}

/// Manual runs are supported everywhere Kane AI is not, and on Kane-enabled
/// real devices outside private cloud.
pub fn manual_supported(kane_supported: bool, platform: Platform, private_cloud: bool) -> bool {
    !kane_supported
        || (kane_supported && platform == Platform::RealDeviceMobile && !private_cloud)
}
