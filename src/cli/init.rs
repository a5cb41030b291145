use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};
use crate::store::SqliteStore;

pub fn run(store: Option<String>, base_url: Option<String>, login: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(path) = store {
        settings.store_path = shellexpand_path(&path);
    }
    if let Some(url) = base_url {
        settings.base_url = url;
    }
    if let Some(login) = login {
        settings.login = login;
    }
    save_settings(&settings)?;

    SqliteStore::open(&settings.store_path())?.close()?;

    println!("Initialized vendorsync store at {}", settings.store_path);
    Ok(())
}
