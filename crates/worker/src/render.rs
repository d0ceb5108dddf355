use pricecast_core::domain::report::PredictionReport;
use pricecast_core::model::ModelKind;
use std::fmt::Write;

/// Plain-text rendering of the test, evaluation and forecast tables.
pub fn report_tables(report: &PredictionReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_tables(&mut out, report);
    out
}

fn write_tables(out: &mut String, report: &PredictionReport) -> std::fmt::Result {
    writeln!(
        out,
        "{}: {} training rows, {} test rows (test split {})",
        report.instrument,
        report.train_table.len(),
        report.test_table.len(),
        report.test_split
    )?;

    writeln!(out, "\nTest predictions (most recent first)")?;
    write!(out, "{:<12}{:>12}", "date", "close")?;
    for kind in ModelKind::ALL {
        write!(out, "{:>20}", short_name(kind))?;
    }
    writeln!(out)?;
    for row in &report.test_table {
        write!(out, "{:<12}{:>12.2}", row.date.to_string(), row.close)?;
        for kind in ModelKind::ALL {
            match row.predictions.get(&kind) {
                Some(v) => write!(out, "{v:>20}")?,
                None => write!(out, "{:>20}", "-")?,
            }
        }
        writeln!(out)?;
    }

    writeln!(out, "\nEvaluation")?;
    writeln!(out, "{:<26}{:>12}{:>14}", "model", "MAPE (%)", "RMSE")?;
    for e in &report.evaluation {
        writeln!(out, "{:<26}{:>12.2}{:>14.4}", e.name, e.mape, e.rmse)?;
    }

    writeln!(out, "\nForecast for {}", report.forecast.date)?;
    for (kind, v) in &report.forecast.predictions {
        writeln!(out, "{:<26}{v:>12}", kind.label())?;
    }

    Ok(())
}

fn short_name(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::SvrRbf => "svr_rbf",
        ModelKind::SvrLinear => "svr_linear",
        ModelKind::SvrPoly => "svr_poly",
        ModelKind::SvrSigmoid => "svr_sigmoid",
        ModelKind::LinearRegression => "linear_regression",
    }
}
