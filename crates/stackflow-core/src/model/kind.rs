//! Known resource kinds
//!
//! The catalog only records what the planner needs: which output attributes a
//! kind produces (so broken references fail at build time) and which
//! configuration attributes cannot be changed in place (so a change forces a
//! replacement). Kinds missing from the catalog are accepted as-is.

/// Output attribute every kind produces
pub const ID_ATTRIBUTE: &str = "id";

/// Static description of a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub name: &'static str,
    /// Output attributes in addition to `id`
    pub outputs: &'static [&'static str],
    /// Configuration attributes that force a replacement when changed
    pub immutable: &'static [&'static str],
}

pub const CATALOG: &[KindSpec] = &[
    KindSpec {
        name: "network",
        outputs: &["cidr", "public_subnets", "private_subnets"],
        immutable: &["cidr", "max_azs"],
    },
    KindSpec {
        name: "cluster",
        outputs: &["arn", "cluster_name"],
        immutable: &["cluster_name", "vpc"],
    },
    KindSpec {
        name: "secret",
        outputs: &["arn", "secret_name"],
        immutable: &["secret_name"],
    },
    KindSpec {
        name: "database",
        outputs: &["endpoint_address", "port", "arn"],
        immutable: &["engine", "database_name", "vpc"],
    },
    KindSpec {
        name: "bucket",
        outputs: &["bucket_name", "arn", "domain_name"],
        immutable: &["bucket_name"],
    },
    KindSpec {
        name: "distribution",
        outputs: &["domain_name", "distribution_id"],
        immutable: &[],
    },
    KindSpec {
        name: "task-definition",
        outputs: &["arn", "family", "revision"],
        immutable: &["family"],
    },
    KindSpec {
        name: "service",
        outputs: &["service_name", "load_balancer_dns", "arn"],
        immutable: &["cluster", "public_load_balancer"],
    },
    KindSpec {
        name: "dns-record",
        outputs: &["fqdn", "zone_name"],
        immutable: &["zone", "record_name"],
    },
    KindSpec {
        name: "alarm",
        outputs: &["arn", "alarm_name"],
        immutable: &["alarm_name"],
    },
];

/// Look up a kind in the catalog
pub fn lookup(kind: &str) -> Option<&'static KindSpec> {
    CATALOG.iter().find(|spec| spec.name == kind)
}

/// Whether `kind` produces the output attribute `attribute`.
///
/// Kinds outside the catalog are trusted to produce whatever is asked of them.
pub fn produces(kind: &str, attribute: &str) -> bool {
    if attribute == ID_ATTRIBUTE {
        return true;
    }
    match lookup(kind) {
        Some(spec) => spec.outputs.contains(&attribute),
        None => true,
    }
}

/// Whether changing `attribute` on a `kind` requires replacing the resource
pub fn is_immutable(kind: &str, attribute: &str) -> bool {
    lookup(kind).is_some_and(|spec| spec.immutable.contains(&attribute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_unique_names() {
        for (i, spec) in CATALOG.iter().enumerate() {
            assert!(
                CATALOG[i + 1..].iter().all(|other| other.name != spec.name),
                "duplicate kind {}",
                spec.name
            );
        }
    }

    #[test]
    fn test_produces() {
        assert!(produces("database", "endpoint_address"));
        assert!(produces("database", "id"));
        assert!(!produces("database", "load_balancer_dns"));
        // uncatalogued kinds are not checked
        assert!(produces("queue", "url"));
    }

    #[test]
    fn test_is_immutable() {
        assert!(is_immutable("database", "engine"));
        assert!(!is_immutable("database", "allocated_storage"));
        assert!(!is_immutable("queue", "anything"));
    }
}
