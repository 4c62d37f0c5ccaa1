//! Tables printed at the end of a command.

use comfy_table::{Table, presets::UTF8_FULL};
use ensforge_deploy::{ConfirmationStatus, OrchestrationPlan, RunReport, describe_arg};

/// Produced identifiers, in production order.
pub fn resources_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Component", "Address", "Transaction", "Block"]);

    for resource in &report.resources {
        let ConfirmationStatus::Confirmed {
            tx_hash,
            block_number,
        } = resource.status;
        table.add_row(vec![
            resource.name.clone(),
            resource.address.to_string(),
            tx_hash.to_string(),
            block_number.to_string(),
        ]);
    }
    table
}

pub fn assignments_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Role", "Path", "Target", "Assigned", "Block"]);

    for record in &report.assignments {
        table.add_row(vec![
            record.role.to_string(),
            record.path.clone().unwrap_or_else(|| "-".to_string()),
            record.target.to_string(),
            record.assigned.to_string(),
            record.block_number.to_string(),
        ]);
    }
    table
}

pub fn plan_table(plan: &OrchestrationPlan) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Component", "Contract", "Arguments", "Libraries"]);

    for (index, component) in plan.deployment().components().iter().enumerate() {
        let args = component
            .args
            .iter()
            .map(describe_arg)
            .collect::<Vec<_>>()
            .join(", ");
        let libraries = component
            .libraries
            .iter()
            .map(|link| format!("{} = @{}", link.library, link.component))
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            index.to_string(),
            component.name.clone(),
            component.contract_name().to_string(),
            args,
            libraries,
        ]);
    }
    table
}

pub fn wiring_table(plan: &OrchestrationPlan) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["#", "Step"]);

    for (index, step) in plan.wiring().iter().enumerate() {
        table.add_row(vec![index.to_string(), step.to_string()]);
    }
    table
}
