use rusqlite_migration::{Migrations, M};

/// Schema for the configuration tables. Reference identities (owner,
/// location, provider) live in columns only; they are records in other
/// systems, not rows here.
pub(crate) fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "
        CREATE TABLE load_balancers (
            id          TEXT NOT NULL PRIMARY KEY,
            name        TEXT NOT NULL,
            owner_id    TEXT NOT NULL,
            location_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            created_by  TEXT,
            updated_by  TEXT,
            deleted_at  INTEGER
        );

        CREATE TABLE ports (
            id               TEXT NOT NULL PRIMARY KEY,
            name             TEXT NOT NULL,
            number           INTEGER NOT NULL,
            load_balancer_id TEXT NOT NULL,
            created_by       TEXT,
            updated_by       TEXT,
            deleted_at       INTEGER
        );

        CREATE TABLE pools (
            id         TEXT NOT NULL PRIMARY KEY,
            name       TEXT NOT NULL,
            protocol   TEXT NOT NULL,
            owner_id   TEXT NOT NULL,
            created_by TEXT,
            updated_by TEXT,
            deleted_at INTEGER
        );

        CREATE TABLE origins (
            id          TEXT NOT NULL PRIMARY KEY,
            name        TEXT NOT NULL,
            target      TEXT NOT NULL,
            port_number INTEGER NOT NULL,
            pool_id     TEXT NOT NULL,
            created_by  TEXT,
            updated_by  TEXT,
            deleted_at  INTEGER
        );

        CREATE TABLE port_pools (
            port_id TEXT NOT NULL,
            pool_id TEXT NOT NULL,
            PRIMARY KEY (port_id, pool_id)
        );
        ",
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_validate() {
        assert!(migrations().validate().is_ok());
    }
}
