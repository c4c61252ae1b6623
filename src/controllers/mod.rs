//! Controllers of the bundled demo application (`demos/blog`).

mod index;
mod layout;
mod shared;
mod users;

use conductor::{Controller, Services};

use users::UserDirectory;

/// Every demo controller, in routing order.
pub fn all() -> Vec<Controller> {
    vec![
        index::controller(),
        users::controller(),
        shared::controller(),
        layout::controller(),
    ]
}

/// Services shared by the demo controllers.
pub fn services() -> Services {
    let mut services = Services::new();
    services.insert(users::SERVICE, UserDirectory::seeded());
    services.insert("site_name", String::from("Conductor Blog"));
    services
}
