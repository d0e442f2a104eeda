#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub value_type: &'static str,
    pub default_value: &'static str,
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    StaticConfigItem {
        key: "storage.dsn",
        description: "PostgreSQL connection string, or a sqlite: DSN",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "storage.sqlite_path",
        description: "SQLite database path (used when storage.dsn is empty)",
        value_type: "string",
        default_value: "router.sqlite",
    },
    StaticConfigItem {
        key: "cache.memory_enabled",
        description: "Serve channel selection from the in-memory routing cache",
        value_type: "boolean",
        default_value: "true",
    },
    StaticConfigItem {
        key: "cache.sync_frequency_seconds",
        description: "Interval between routing cache rebuilds",
        value_type: "number",
        default_value: "60",
    },
    StaticConfigItem {
        key: "cache.redis_url",
        description: "Redis connection string for shared rate limit counters",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "rate_limit.distributed",
        description: "Keep rate limit counters in Redis so all instances share them",
        value_type: "boolean",
        default_value: "false",
    },
    StaticConfigItem {
        key: "rate_limit.window_seconds",
        description: "Length of the fixed rate limit window",
        value_type: "number",
        default_value: "60",
    },
    StaticConfigItem {
        key: "rate_limit.store_timeout_ms",
        description: "Deadline for one shared rate limit check",
        value_type: "number",
        default_value: "500",
    },
    StaticConfigItem {
        key: "rate_limit.key_prefix",
        description: "Key namespace for shared rate limit counters",
        value_type: "string",
        default_value: "rate_limit",
    },
    StaticConfigItem {
        key: "routing.auto_groups",
        description: "Comma-separated groups tried in order for the auto group",
        value_type: "string",
        default_value: "",
    },
];
