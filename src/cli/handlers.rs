use crate::adapter::{Adapter, Data};
use crate::error::Result;
use crate::task::{DataTask, Timestamp};
use serde_json::json;
use std::sync::Arc;

fn scope_label(scope: Option<&str>) -> String {
    scope.map_or_else(|| "default scope".to_string(), |s| format!("scope {s}"))
}

/// Handle the setup command
pub fn handle_setup(adapter: &dyn Adapter, scope: Option<&str>, force: bool) -> Result<()> {
    adapter.set_up_tracking(scope, force)?;
    println!("Tracking set up in {}", scope_label(scope));
    Ok(())
}

/// Handle the teardown command
pub fn handle_teardown(adapter: &dyn Adapter, scope: Option<&str>) -> Result<()> {
    adapter.tear_down_tracking(scope)?;
    println!("Tracking removed from {}", scope_label(scope));
    Ok(())
}

pub fn handle_teardown_global(adapter: &dyn Adapter) -> Result<()> {
    adapter.tear_down_global_tracking()?;
    println!("Database-wide tracking artifacts removed");
    Ok(())
}

pub fn handle_reset(adapter: &dyn Adapter, scope: Option<&str>) -> Result<()> {
    adapter.reset_tracking(scope)?;
    println!("Tracking reset in {}", scope_label(scope));
    Ok(())
}

/// Handle the status command
pub fn handle_status(adapter: &dyn Adapter, scope: Option<&str>) -> Result<()> {
    let state = if adapter.is_tracking(scope)? {
        "set up"
    } else {
        "not set up"
    };
    println!("{}: tracking is {state} in {}", adapter.kind(), scope_label(scope));
    Ok(())
}

pub fn handle_exists(adapter: &dyn Adapter, name: &str) -> Result<()> {
    println!("{}", adapter.data_exists(name, None)?);
    Ok(())
}

/// Handle the mtime command
pub fn handle_mtime(adapter: &dyn Adapter, name: &str, as_json: bool) -> Result<()> {
    let mtime = adapter.data_mtime(name)?;
    if as_json {
        println!("{}", json!({ "name": name, "mtime": mtime }));
    } else {
        let stamp = mtime.map_or(Timestamp::Early, Timestamp::At);
        println!("{stamp}");
    }
    Ok(())
}

/// Handle the history command
pub fn handle_history(adapter: &dyn Adapter, name: &str, as_json: bool) -> Result<()> {
    let operations = adapter.tracked_operations(name)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No tracked operations for {name}");
    }
    for op in &operations {
        println!(
            "{}  {:<8}  {}",
            op.time.to_rfc3339(),
            op.operation.as_str(),
            op.relation_name
        );
    }
    Ok(())
}

/// Handle the needed command
pub fn handle_needed(adapter: &Arc<dyn Adapter>, name: &str, prereqs: &[String]) -> Result<()> {
    let mut stamps = Vec::with_capacity(prereqs.len());
    for prereq in prereqs {
        stamps.push(DataTask::new(Data::new(prereq.as_str(), Arc::clone(adapter))).timestamp()?);
    }
    let task = DataTask::new(Data::new(name, Arc::clone(adapter)));
    println!("{}", task.needed(&stamps)?);
    Ok(())
}
