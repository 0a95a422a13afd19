/// Default names and values shared across the codebase.
/// Everything here can be overridden from the TOML configuration.

// Survey source field names
pub const DEFAULT_ID_FIELD: &str = "_uuid";
pub const DEFAULT_COORDINATE_FIELD: &str = "geo_ref/geo_punto";
pub const DEFAULT_TIMESTAMP_FIELD: &str = "start";
pub const DEFAULT_TOKEN_ENV: &str = "KOBO_TOKEN";
pub const DEFAULT_AUTH_SCHEME: &str = "Token";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

// Sheet credentials
pub const DEFAULT_SHEET_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

// Pushgateway
pub const DEFAULT_METRICS_JOB: &str = "survey_sync";
pub const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

/// Candidate attribute names carrying the administrative partition code, in
/// the order they are tried.
pub const DEFAULT_CODE_ALIASES: &[&str] = &[
    "comunas", "COMUNAS", "comuna", "COMUNA", "NAM", "ID", "OBJETO", "barrio",
];

pub const DEFAULT_CRS: &str = "EPSG:4326";

// Derived column names
pub const DEFAULT_SHIFT_COLUMN: &str = "shift";
pub const DEFAULT_DATE_COLUMN: &str = "start";
pub const DEFAULT_TIME_COLUMN: &str = "start_time";
pub const DEFAULT_LATITUDE_COLUMN: &str = "latitude";
pub const DEFAULT_LONGITUDE_COLUMN: &str = "longitude";
pub const DEFAULT_ALTITUDE_COLUMN: &str = "altitude";
pub const DEFAULT_PRECISION_COLUMN: &str = "precision";
pub const DEFAULT_CORRIDOR_COLUMN: &str = "corridor";
pub const DEFAULT_ZONE_COLUMN: &str = "zone";

/// Built-in patrol corridors as `(name, [lon, lat] ring)`.
pub const DEFAULT_CORRIDORS: &[(&str, &[[f64; 2]])] = &[
    (
        "Recorrido A",
        &[
            [-58.41017, -34.588232],
            [-58.413901, -34.594177],
            [-58.413904, -34.599714],
            [-58.400064, -34.600033],
            [-58.386224, -34.599855],
            [-58.398154, -34.59498],
            [-58.404592, -34.593108],
            [-58.386524, -34.595263],
            [-58.41017, -34.588232],
        ],
    ),
    (
        "Recorrido B",
        &[
            [-58.389185, -34.584593],
            [-58.395365, -34.587137],
            [-58.400944, -34.594168],
            [-58.398154, -34.59498],
            [-58.386524, -34.595263],
            [-58.383284, -34.587544],
            [-58.388112, -34.59256],
            [-58.389185, -34.584593],
        ],
    ),
    (
        "Recorrido C",
        &[
            [-58.400944, -34.594168],
            [-58.395365, -34.587137],
            [-58.389185, -34.584593],
            [-58.398455, -34.580212],
            [-58.407295, -34.581837],
            [-58.404592, -34.593108],
            [-58.41017, -34.588232],
            [-58.400944, -34.594168],
        ],
    ),
];
