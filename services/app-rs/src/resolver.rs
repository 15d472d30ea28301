//! Catalog resolution for the redirect path.

use sqlx::PgPool;

use common_rs::enums::{DomainStatus, LinkStatus};

use crate::models::Resolution;

/// Strip an optional port and lowercase, so `Example.Test:8080` and
/// `example.test` resolve identically.
pub fn normalize_hostname(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    host.trim().to_lowercase()
}

/// Resolve `(hostname, slug)` against the catalog.
///
/// One point-read joining the verified domain to its active link. Unresolved
/// is a value, not an error: an unknown hostname, an unverified domain, a
/// missing slug, and a paused link are all indistinguishable `None`s.
pub async fn resolve(
    pool: &PgPool,
    hostname: &str,
    slug: &str,
) -> Result<Option<Resolution>, sqlx::Error> {
    let hostname = normalize_hostname(hostname);
    let slug = slug.trim().to_lowercase();

    sqlx::query_as(
        r#"
        SELECT l.workspace_id, l.id AS link_id, d.id AS domain_id,
               d.hostname AS domain, l.slug, l.destination_url
        FROM domains d
        JOIN links l ON l.domain_id = d.id
        WHERE lower(d.hostname) = $1
          AND d.status = $3
          AND lower(l.slug) = $2
          AND l.status = $4
        "#,
    )
    .bind(&hostname)
    .bind(&slug)
    .bind(DomainStatus::Verified.as_str())
    .bind(LinkStatus::Active.as_str())
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_lowercased_and_stripped_of_port() {
        assert_eq!(normalize_hostname("Example.Test"), "example.test");
        assert_eq!(normalize_hostname("example.test:8080"), "example.test");
        assert_eq!(normalize_hostname("  go.acme.io  "), "go.acme.io");
    }
}
