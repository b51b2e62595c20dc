use clap::Subcommand;

use ade_core::UserId;
use ade_storage::model::User;

use super::connect;

#[derive(Subcommand)]
pub enum AdminCommand {
    /// Apply pending database migrations.
    Migrate,
    /// Create a user, optionally marking them a global admin.
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        global_admin: bool,
    },
    /// Grant a role to a user, globally or scoped to one workspace.
    AssignRole {
        #[arg(long)]
        user_id: uuid::Uuid,
        #[arg(long)]
        role_id: uuid::Uuid,
        #[arg(long)]
        workspace_id: Option<uuid::Uuid>,
    },
}

pub async fn run(command: AdminCommand) -> anyhow::Result<()> {
    let database_url =
        std::env::var("ADE_DATABASE_URL").map_err(|_| anyhow::anyhow!("ADE_DATABASE_URL is not set"))?;
    let pool = connect(&database_url).await?;

    match command {
        AdminCommand::Migrate => {
            sqlx::migrate!("./migrations").run(&pool).await?;
            println!("migrations applied");
        }
        AdminCommand::CreateUser { email, display_name, global_admin } => {
            let user = User {
                id: UserId::new(),
                email,
                display_name,
                is_global_admin: global_admin,
                created_at: chrono::Utc::now(),
            };
            sqlx::query(
                r#"INSERT INTO users (id, email, display_name, is_global_admin, created_at) VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(user.id.as_uuid())
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(user.is_global_admin)
            .bind(user.created_at)
            .execute(&pool)
            .await?;
            println!("created user {} ({})", user.id.as_uuid(), user.email);
        }
        AdminCommand::AssignRole { user_id, role_id, workspace_id } => {
            sqlx::query(
                r#"
                INSERT INTO role_assignments (user_id, role_id, workspace_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(role_id)
            .bind(workspace_id)
            .execute(&pool)
            .await?;
            println!("assigned role {role_id} to user {user_id}");
        }
    }

    Ok(())
}
