// pgsnap/src/backup/db_dump.rs
use std::path::Path;

use crate::config::ToolsConfig;
use crate::model::{ArtifactKind, ConnectionDescriptor};
use crate::runner::StepCommand;

/// Environment variable the client tools read the password from.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

/// Builds the dump invocation writing `kind` into `output`.
///
/// Roles are cluster-wide, so they come from the roles dump tool; the other kinds are
/// scoped dumps of the target database. The password never appears in the arguments.
/// Role passwords are left out: reading them needs superuser, which hosted instances
/// do not grant.
pub fn dump_command(
    kind: ArtifactKind,
    conn: &ConnectionDescriptor,
    tools: &ToolsConfig,
    output: &Path,
) -> StepCommand {
    let program = match kind {
        ArtifactKind::Roles => &tools.roles_dump,
        _ => &tools.dump,
    };

    let mut cmd = StepCommand::new(program.as_str())
        .arg("-h")
        .arg(conn.host.as_str())
        .arg("-p")
        .arg(conn.port.to_string())
        .arg("-U")
        .arg(conn.user.as_str());

    cmd = match kind {
        ArtifactKind::Roles => cmd
            .arg("-l")
            .arg(conn.database.as_str())
            .arg("--roles-only")
            .arg("--no-role-passwords"),
        ArtifactKind::Schema => cmd
            .arg("-d")
            .arg(conn.database.as_str())
            .arg("--schema-only"),
        ArtifactKind::Data => cmd
            .arg("-d")
            .arg(conn.database.as_str())
            .arg("--data-only"),
        ArtifactKind::StoragePolicies => cmd
            .arg("-d")
            .arg(conn.database.as_str())
            .arg("--schema")
            .arg(tools.storage_schema.as_str()),
    };

    cmd.arg("-f")
        .arg(output.to_string_lossy())
        .env(PASSWORD_ENV, conn.password.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn conn() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "127.0.0.1".into(),
            port: 54322,
            user: "postgres".into(),
            password: "s3cret".into(),
            database: "postgres".into(),
            is_running: true,
        }
    }

    #[test]
    fn roles_use_the_cluster_dump_tool() {
        let out = PathBuf::from("/dumps/x/roles.sql");
        let cmd = dump_command(ArtifactKind::Roles, &conn(), &ToolsConfig::default(), &out);
        assert_eq!(cmd.program, "pg_dumpall");
        assert_eq!(
            cmd.args,
            vec![
                "-h", "127.0.0.1", "-p", "54322", "-U", "postgres", "-l", "postgres",
                "--roles-only", "--no-role-passwords", "-f", "/dumps/x/roles.sql"
            ]
        );
    }

    #[test]
    fn cloud_roles_dump_skips_role_passwords() {
        let cloud = ConnectionDescriptor {
            host: "db.abcd.supabase.co".into(),
            port: 5432,
            ..conn()
        };
        let cmd = dump_command(
            ArtifactKind::Roles,
            &cloud,
            &ToolsConfig::default(),
            Path::new("roles.sql"),
        );
        assert!(cmd.args.contains(&"--no-role-passwords".to_string()));
        assert_eq!(cmd.arg_after("-h"), Some("db.abcd.supabase.co"));
    }

    #[test]
    fn mode_flags_per_kind() {
        let tools = ToolsConfig::default();
        let out = PathBuf::from("out.sql");
        let flags = |kind| dump_command(kind, &conn(), &tools, &out).args;

        assert!(flags(ArtifactKind::Schema).contains(&"--schema-only".to_string()));
        assert!(flags(ArtifactKind::Data).contains(&"--data-only".to_string()));
        let storage = dump_command(ArtifactKind::StoragePolicies, &conn(), &tools, &out);
        assert_eq!(storage.program, "pg_dump");
        assert_eq!(storage.arg_after("--schema"), Some("storage"));
        assert_eq!(storage.arg_after("-d"), Some("postgres"));
    }

    #[test]
    fn password_only_travels_in_the_environment() {
        let tools = ToolsConfig::default();
        for kind in ArtifactKind::ALL {
            let cmd = dump_command(kind, &conn(), &tools, Path::new("f.sql"));
            assert!(cmd.args.iter().all(|a| !a.contains("s3cret")));
            assert_eq!(cmd.env, vec![(PASSWORD_ENV.to_string(), "s3cret".to_string())]);
        }
    }
}
