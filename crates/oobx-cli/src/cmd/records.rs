//! `oobx records`, `oobx show`, and `oobx prune`

use super::{boot_kernel, print_json};
use crate::table::Table;
use crate::ui;
use oobx_types::config::OobConfig;
use oobx_types::record::OobRecord;

fn short(value: Option<&str>) -> String {
    match value {
        Some(v) if v.chars().count() > 12 => format!("{}...", v.chars().take(12).collect::<String>()),
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

fn table(records: &[OobRecord]) -> Table {
    let mut t = Table::new(&["ID", "ROLE", "STATE", "INVITATION", "CONNECTION", "UPDATED"]);
    for r in records {
        t.add_row(vec![
            r.oob_id.clone(),
            r.role.to_string(),
            r.state.to_string(),
            short(Some(&r.invi_msg_id)),
            short(r.connection_id.as_deref()),
            r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    t
}

pub fn cmd_records(config: OobConfig, json: bool) {
    let kernel = boot_kernel(config);
    let records = match kernel.manager().list_records() {
        Ok(r) => r,
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    };
    if json {
        print_json(&records);
        return;
    }
    let t = table(&records);
    if t.is_empty() {
        println!("No out-of-band records.");
        ui::hint("create one with `oobx create --handshake rfc23`");
        return;
    }
    t.print();
}

pub fn cmd_show(config: OobConfig, oob_id: &str) {
    let kernel = boot_kernel(config);
    match kernel.manager().get_record(oob_id) {
        Ok(Some(record)) => print_json(&record),
        Ok(None) => {
            ui::error_with_fix(&format!("No record {oob_id}"), "List ids with `oobx records`");
            std::process::exit(1);
        }
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    }
}

pub fn cmd_prune(config: OobConfig, invitation_id: &str) {
    let kernel = boot_kernel(config);
    match kernel
        .manager()
        .delete_stale_connection_by_invitation(invitation_id)
    {
        Ok(0) => println!("Nothing to prune for {invitation_id}."),
        Ok(n) => ui::success(&format!("Deleted {n} unused connection(s)")),
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    }
}
