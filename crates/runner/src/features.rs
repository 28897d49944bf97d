/// Exports every guest must provide.
pub const REQUIRED_EXPORTS: [&str; 5] = [
    "start",
    "free_result",
    "get_search_manga_list",
    "get_manga_update",
    "get_page_list",
];

/// Entry points a guest may leave out; each gates one [`SourceFeatures`] flag.
pub const OPTIONAL_EXPORTS: [&str; 15] = [
    "get_manga_list",
    "get_home",
    "get_filters",
    "get_settings",
    "get_listings",
    "process_page_image",
    "get_image_request",
    "get_page_description",
    "get_alternate_covers",
    "get_base_url",
    "handle_notification",
    "handle_deep_link",
    "handle_basic_login",
    "handle_web_login",
    "handle_id_migration",
];

/// Optional entry points a guest implements, resolved once at load.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SourceFeatures {
    pub provides_listings: bool,
    pub provides_home: bool,
    pub dynamic_filters: bool,
    pub dynamic_settings: bool,
    pub dynamic_listings: bool,
    pub processes_pages: bool,
    pub provides_image_requests: bool,
    pub provides_page_descriptions: bool,
    pub provides_alternate_covers: bool,
    pub provides_base_url: bool,
    pub handles_notifications: bool,
    pub handles_deep_links: bool,
    pub handles_basic_login: bool,
    pub handles_web_login: bool,
    pub handles_migration: bool,
}

impl SourceFeatures {
    /// Build the flag set from an export lookup.
    pub fn detect(has_export: impl Fn(&str) -> bool) -> Self {
        Self {
            provides_listings: has_export("get_manga_list"),
            provides_home: has_export("get_home"),
            dynamic_filters: has_export("get_filters"),
            dynamic_settings: has_export("get_settings"),
            dynamic_listings: has_export("get_listings"),
            processes_pages: has_export("process_page_image"),
            provides_image_requests: has_export("get_image_request"),
            provides_page_descriptions: has_export("get_page_description"),
            provides_alternate_covers: has_export("get_alternate_covers"),
            provides_base_url: has_export("get_base_url"),
            handles_notifications: has_export("handle_notification"),
            handles_deep_links: has_export("handle_deep_link"),
            handles_basic_login: has_export("handle_basic_login"),
            handles_web_login: has_export("handle_web_login"),
            handles_migration: has_export("handle_id_migration"),
        }
    }

    /// Whether calling `export` is permitted. Names outside the optional set
    /// are always permitted.
    #[must_use]
    pub fn supports(&self, export: &str) -> bool {
        match export {
            "get_manga_list" => self.provides_listings,
            "get_home" => self.provides_home,
            "get_filters" => self.dynamic_filters,
            "get_settings" => self.dynamic_settings,
            "get_listings" => self.dynamic_listings,
            "process_page_image" => self.processes_pages,
            "get_image_request" => self.provides_image_requests,
            "get_page_description" => self.provides_page_descriptions,
            "get_alternate_covers" => self.provides_alternate_covers,
            "get_base_url" => self.provides_base_url,
            "handle_notification" => self.handles_notifications,
            "handle_deep_link" => self.handles_deep_links,
            "handle_basic_login" => self.handles_basic_login,
            "handle_web_login" => self.handles_web_login,
            "handle_id_migration" => self.handles_migration,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_exports() {
        let exports = ["get_home", "handle_deep_link", "start"];
        let features = SourceFeatures::detect(|name| exports.contains(&name));
        assert!(features.provides_home);
        assert!(features.handles_deep_links);
        assert!(!features.provides_listings);
        assert!(features.supports("get_home"));
        assert!(!features.supports("get_manga_list"));
        assert!(features.supports("get_page_list"));
    }

    #[test]
    fn every_optional_export_gates_a_flag() {
        let all = SourceFeatures::detect(|name| OPTIONAL_EXPORTS.contains(&name));
        let none = SourceFeatures::default();
        for name in OPTIONAL_EXPORTS {
            assert!(all.supports(name), "{name}");
            assert!(!none.supports(name), "{name}");
        }
    }
}
