use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query>", args[0]);
        eprintln!("Search query matches against sender address or subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://postbox.db".to_string());
    let pool = SqlitePoolOptions::new().connect(&database_url).await?;

    let rows = sqlx::query(
        "SELECT id, owner_id, from_email, subject, category, is_read, is_replied, created_at \
         FROM emails \
         WHERE from_email LIKE ? OR subject LIKE ? \
         ORDER BY created_at DESC \
         LIMIT 50",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_all(&pool)
    .await?;

    println!("Found {} matching emails for '{}':", rows.len(), query);
    for row in rows {
        let id: String = row.get("id");
        let owner: String = row.get("owner_id");
        let from: String = row.get("from_email");
        let subject: String = row.get("subject");
        let category: String = row.get("category");
        let is_read: bool = row.get("is_read");
        let is_replied: bool = row.get("is_replied");
        let created_at: String = row.get("created_at");

        println!(
            "  [{}] {} | {} | from {} | owner {} | read={} replied={} | {}",
            category, id, subject, from, owner, is_read, is_replied, created_at
        );
    }

    Ok(())
}
