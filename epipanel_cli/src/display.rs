use comfy_table::{presets::NOTHING, *};
use epipanel::checks::ConsistencyReport;
use epipanel::pipeline::{RunLog, Verification};

fn table_with_header(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        )
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

pub fn run_log_table(log: &RunLog) -> Table {
    let mut table = table_with_header(vec!["Stage", "Rows", "Detail"]);
    for event in log.events() {
        table.add_row(vec![
            event.stage.to_string(),
            event.rows.to_string(),
            event.detail.clone(),
        ]);
    }
    table
}

pub fn consistency_table(reports: &[ConsistencyReport]) -> Table {
    let mut table = table_with_header(vec!["Metric", "Entities checked", "Mismatched entities"]);
    for report in reports {
        let mismatched = if report.is_consistent() {
            "none".to_string()
        } else {
            report
                .mismatches
                .iter()
                .map(|m| {
                    format!(
                        "{} (daily sum {}, latest total {})",
                        m.entity, m.daily_new_sum, m.latest_running_total
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        table.add_row(vec![
            report.metric.clone(),
            report.entities_checked.to_string(),
            mismatched,
        ]);
    }
    table
}

pub fn display_verification(verification: &Verification) {
    println!(
        "\n{} rows, {} duplicate (entity, date) rows",
        verification.rows, verification.duplicate_entity_dates
    );
    println!("{}", consistency_table(&verification.consistency));
}
