use crate::db::{get_connection, row_count};
use crate::error::Result;
use crate::settings::load_settings;
use crate::sync::RUN_ORDER;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let store_path = settings.store_path();

    println!("Portal:     {}", settings.base_url);
    println!("Login:      {}", if settings.login.is_empty() { "(not set)" } else { &settings.login });
    println!("Store:      {}", store_path.display());
    println!("Chunk size: {}", settings.chunk_size);
    println!("Max pages:  {}", settings.max_pages);

    if store_path.exists() {
        let conn = get_connection(&store_path)?;
        println!();
        for kind in RUN_ORDER {
            let table = kind.table();
            println!("{:<18}{}", format!("{table}:"), row_count(&conn, table)?);
        }
    } else {
        println!();
        println!("Store not found. Run `vendorsync init` to set up.");
    }
    Ok(())
}
