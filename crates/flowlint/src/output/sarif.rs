//! SARIF 2.1.0 output.

use serde_sarif::sarif::{
    ArtifactLocationBuilder, LocationBuilder as SarifLocationBuilder, MessageBuilder,
    PhysicalLocationBuilder, RegionBuilder, ResultBuilder as SarifResultBuilder, ResultLevel,
    RunBuilder, Sarif, SarifBuilder, ToolBuilder, ToolComponentBuilder,
};
use serde_sarif::sarif::{Result as SarifResult, Run};

use crate::finding::Kind;
use crate::linter::ValidateResult;

impl From<Kind> for ResultLevel {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Syntax | Kind::Semantic | Kind::SecurityCritical | Kind::SecurityHigh => {
                ResultLevel::Error
            }
            Kind::SecurityMedium | Kind::Deprecation => ResultLevel::Warning,
            Kind::SecurityLow | Kind::Style => ResultLevel::Note,
        }
    }
}

/// Builds a SARIF report over every diagnostic of `results`.
pub fn build(results: &[ValidateResult]) -> Sarif {
    SarifBuilder::default()
        .version("2.1.0")
        .schema("https://json.schemastore.org/sarif-2.1.0.json")
        .runs([build_run(results)])
        .build()
        .expect("sarif builds")
}

fn build_run(results: &[ValidateResult]) -> Run {
    RunBuilder::default()
        .tool(
            ToolBuilder::default()
                .driver(
                    ToolComponentBuilder::default()
                        .name(env!("CARGO_PKG_NAME"))
                        .version(env!("CARGO_PKG_VERSION"))
                        .build()
                        .expect("tool component builds"),
                )
                .build()
                .expect("tool builds"),
        )
        .results(build_results(results))
        .build()
        .expect("run builds")
}

fn build_results(results: &[ValidateResult]) -> Vec<SarifResult> {
    results
        .iter()
        .flat_map(|result| {
            result.diagnostics.iter().map(|diagnostic| {
                SarifResultBuilder::default()
                    .rule_id(diagnostic.rule)
                    .message(
                        MessageBuilder::default()
                            .text(diagnostic.message.as_str())
                            .build()
                            .expect("message builds"),
                    )
                    .level(
                        serde_json::to_value(ResultLevel::from(diagnostic.kind))
                            .expect("result level serializes"),
                    )
                    .locations([SarifLocationBuilder::default()
                        .physical_location(
                            PhysicalLocationBuilder::default()
                                .artifact_location(
                                    ArtifactLocationBuilder::default()
                                        .uri(diagnostic.path.as_str())
                                        .build()
                                        .expect("artifact location builds"),
                                )
                                .region(
                                    RegionBuilder::default()
                                        .start_line(diagnostic.line as i64)
                                        .start_column(diagnostic.column as i64)
                                        .source_language("yaml")
                                        .build()
                                        .expect("region builds"),
                                )
                                .build()
                                .expect("physical location builds"),
                        )
                        .build()
                        .expect("location builds")])
                    .build()
                    .expect("result builds")
            })
        })
        .collect()
}
