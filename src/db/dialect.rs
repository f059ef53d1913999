//! Dialect-specific connection strings.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, DatabaseType};

/// Build the driver connection string for the configured dialect.
///
/// - mysql: `user:password@tcp(host:port)/database?charset=utf8&parseTime=True&loc=Local&interpolateParams=true`
/// - postgres: `host=<host> port=<port> user=<user> password=<password> dbname=<database> sslmode=disable`
/// - sqlite: `file:<database>`
pub fn build_connection_string(config: &ConnectionConfig) -> DbResult<String> {
    let db_type = config
        .database_type()
        .ok_or_else(|| DbError::unsupported_dialect(&config.dialect))?;

    let port = config
        .port_or_default()
        .map(|p| p.to_string())
        .unwrap_or_default();

    let connection_string = match db_type {
        DatabaseType::MySQL => format!(
            "{}:{}@tcp({}:{})/{}?charset=utf8&parseTime=True&loc=Local&interpolateParams=true",
            config.user, config.password, config.host, port, config.database
        ),
        DatabaseType::PostgreSQL => format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            config.host, port, config.user, config.password, config.database
        ),
        DatabaseType::SQLite => format!("file:{}", config.database),
    };

    Ok(connection_string)
}

/// Connection string with the password replaced by `****`, safe to log.
pub fn masked_connection_string(config: &ConnectionConfig) -> DbResult<String> {
    let masked = ConnectionConfig {
        password: if config.password.is_empty() {
            String::new()
        } else {
            "****".to_string()
        },
        ..config.clone()
    };
    build_connection_string(&masked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dialect: &str) -> ConnectionConfig {
        ConnectionConfig::new(dialect, "host", Some(3201), "user", "password", "test")
    }

    #[test]
    fn test_mysql_connection_string() {
        assert_eq!(
            build_connection_string(&config("mysql")).unwrap(),
            "user:password@tcp(host:3201)/test?charset=utf8&parseTime=True&loc=Local&interpolateParams=true"
        );
    }

    #[test]
    fn test_postgres_connection_string() {
        assert_eq!(
            build_connection_string(&config("postgres")).unwrap(),
            "host=host port=3201 user=user password=password dbname=test sslmode=disable"
        );
    }

    #[test]
    fn test_sqlite_connection_string_ignores_server_fields() {
        let config = ConnectionConfig::new("sqlite", "ignored", Some(1), "u", "p", "test.db");
        assert_eq!(build_connection_string(&config).unwrap(), "file:test.db");
    }

    #[test]
    fn test_unsupported_dialect() {
        let result = build_connection_string(&config("mssql"));
        assert!(matches!(
            result,
            Err(DbError::UnsupportedDialect { ref dialect }) if dialect == "mssql"
        ));
    }

    #[test]
    fn test_dialect_names_are_exact() {
        for dialect in ["postgresql", "MySQL", "mariadb", "sqlite3", " postgres "] {
            let result = build_connection_string(&config(dialect));
            assert!(
                matches!(result, Err(DbError::UnsupportedDialect { .. })),
                "{dialect:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_default_port_used_when_missing() {
        let config = ConnectionConfig::new("postgres", "db", None, "u", "p", "app");
        assert!(
            build_connection_string(&config)
                .unwrap()
                .contains("port=5432")
        );
    }

    #[test]
    fn test_masked_connection_string() {
        let masked = masked_connection_string(&config("mysql")).unwrap();
        assert!(!masked.contains("password@"));
        assert!(masked.starts_with("user:****@tcp(host:3201)"));
    }
}
