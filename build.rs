//! Build stamp for `rtas-cli --version`.
//!
//! Dates are UTC in ISO 8601. `SOURCE_DATE_EPOCH` pins the stamp for
//! reproducible builds; `RTAS_BUILD_DATE` / `RTAS_BUILD_TIME` override each
//! part verbatim.

use time::macros::format_description;
use time::OffsetDateTime;

fn build_instant() -> OffsetDateTime {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

fn main() {
    let at = build_instant();
    let date_fmt = format_description!("[year]-[month]-[day]");
    let time_fmt = format_description!("[hour]:[minute]:[second]Z");

    let date = std::env::var("RTAS_BUILD_DATE")
        .unwrap_or_else(|_| at.format(date_fmt).unwrap_or_else(|_| "unknown".to_string()));
    let time = std::env::var("RTAS_BUILD_TIME")
        .unwrap_or_else(|_| at.format(time_fmt).unwrap_or_else(|_| "unknown".to_string()));

    for var in ["SOURCE_DATE_EPOCH", "RTAS_BUILD_DATE", "RTAS_BUILD_TIME"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rustc-env=RTAS_BUILD_DATE={date}");
    println!("cargo:rustc-env=RTAS_BUILD_TIME={time}");
}
