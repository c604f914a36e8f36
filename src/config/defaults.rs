// src/config/defaults.rs
//! The built-in RAC weekly layout.

use std::path::PathBuf;

use super::{Config, CountSource, CountsConfig, HandoffConfig, IntakeConfig, JobConfig, QuotesConfig};
use crate::jobs::intake::{DateRangeColumns, PatternRename, SuffixRename};
use crate::jobs::{BucketOutput, InputStep, ProofJob};
use crate::jobs::proofs::{CombinedOutput, ProofInput};
use crate::process::breakmark::BreakMarkSpec;
use crate::process::counts::{CountGroup, CountLabel, CountSection};
use crate::process::format::{Transform, US_DATE};
use crate::process::proof::ProofSpec;
use crate::process::split::{Matcher, SplitRule};
use crate::schema::SourceSchema;
use crate::table::{TextEncoding, WriteOptions};

const VERSION: &str = "Creative_Version_Cd";

const NCWO_HEADER: [&str; 37] = [
    "Campaign_Cd",
    "Campaign_Name",
    "Campaign_Type_Cd",
    "Cell_Cd",
    "Cell_Name",
    "Channel_Cd",
    "Creative_Version_Cd",
    "Campaign_Deployment_Dt",
    "Individual_Id",
    "First_Name",
    "Last_Name",
    "OCR",
    "AddressLine_1",
    "AddressLIne_2",
    "City",
    "State_Cd",
    "Postal_Cd",
    "Zip4",
    "Store_Id",
    "Store_AddressLine_1",
    "Store_AddressLine_2",
    "Store_City",
    "Store_State_Cd",
    "Store_Postal_Cd",
    "Store_Phone_Number",
    "Store_License",
    "DMA_Name",
    "CUSTOM_01",
    "CUSTOM_02",
    "CUSTOM_03",
    "CUSTOM_04",
    "CUSTOM_05",
    "CUSTOM_06",
    "CUSTOM_07",
    "CUSTOM_08",
    "CUSTOM_09",
    "CUSTOM_10",
];

const NCWO_CRITICAL: [&str; 12] = [
    "Full Name",
    "Title",
    "Address Line 1",
    "City State ZIP Code",
    "Store_AddressLine_1",
    "Store_City",
    "Store_Phone_Number",
    "VERSION",
    "START_DATE",
    "END_DATE",
    "Creative_Version_Cd",
    "Individual_Id",
];

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn cp1252() -> WriteOptions {
    WriteOptions {
        encoding: TextEncoding::Windows1252,
        ..WriteOptions::default()
    }
}

fn job(name: &str, working_dir: &str, archive_base: &str, suffix: &str, routes: &[&str]) -> JobConfig {
    JobConfig {
        name: name.to_string(),
        working_dir: PathBuf::from(working_dir),
        archive_base: PathBuf::from(archive_base),
        proof_zip_suffix: suffix.to_string(),
        routes: strings(routes),
        input_steps: Vec::new(),
        proof_jobs: Vec::new(),
    }
}

fn utf8_bom() -> WriteOptions {
    WriteOptions {
        bom: true,
        ..WriteOptions::default()
    }
}

fn licensed_first() -> ProofSpec {
    ProofSpec::default().with_required("Store_License").first_rows()
}

fn proof_job(name: &str, inputs: Vec<ProofInput>, buckets: Vec<BucketOutput>, proof: ProofSpec) -> ProofJob {
    ProofJob {
        name: name.to_string(),
        inputs,
        buckets,
        proof: Some(proof),
        output_dir: "OUTPUT".into(),
        proof_dir: "PROOF".into(),
    }
}

/// One presort output of the CBC job, kept whole with `CUSTOM_03` as money,
/// plus one proof file holding the first rows of each version.
fn cbc_input(list: &str) -> ProofInput {
    ProofInput {
        file: format!("{list}_WEEKLY.csv"),
        schema: Some(SourceSchema::new("cbc", &[VERSION, "CUSTOM_03"])),
        transforms: vec![Transform::Currency {
            column: "CUSTOM_03".into(),
        }],
        split_column: VERSION.into(),
        rules: ["A", "CANC", "PR"]
            .iter()
            .map(|t| SplitRule::new(&format!("{list}-{t}"), Matcher::Suffix(format!("-{t}"))))
            .collect(),
        combined: Some(CombinedOutput {
            output: Some(format!("{list}WEEKLYREFORMAT.csv")),
            proof: format!("{list}WEEKLYREFORMAT-PD.csv"),
            write: WriteOptions::default(),
        }),
    }
}

fn cbc() -> JobConfig {
    let mut j = job("CBC", "CBC/JOB", "CBC", "CBCPROOFS", &["202404", "201209"]);
    j.input_steps = vec![InputStep::SplitByColumn {
        column: VERSION.into(),
        values: strings(&[
            "RAC2401-DM03-A",
            "RAC2401-DM03-CANC",
            "RAC2401-DM03-PR",
            "RAC2404-DM07-CBC2-A",
            "RAC2404-DM07-CBC2-PR",
            "RAC2404-DM07-CBC2-CANC",
        ]),
        extension: "txt".into(),
    }];
    j.proof_jobs = vec![proof_job(
        "CBC",
        vec![cbc_input("CBC2"), cbc_input("CBC3")],
        Vec::new(),
        licensed_first(),
    )];
    j
}

fn exc() -> JobConfig {
    let mut j = job("EXC", "EXC/JOB", "EXC", "EXCPROOFS", &["202406"]);
    j.input_steps = vec![InputStep::Concatenate {
        output: "EXC.txt".into(),
        extension: "txt".into(),
    }];
    let input = ProofInput {
        file: "EXC_OUTPUT.csv".into(),
        schema: Some(SourceSchema::new("exc", &[VERSION])),
        transforms: Vec::new(),
        split_column: VERSION.into(),
        rules: vec![
            SplitRule::new("RACXW-A", Matcher::Suffix("-RACXW-A".into())),
            SplitRule::new("RACXW-PR", Matcher::Suffix("-RACXW-PR".into())),
        ],
        combined: Some(CombinedOutput {
            output: None,
            proof: "EXC_PROOF_DATA.csv".into(),
            write: WriteOptions::default(),
        }),
    };
    let pr = BucketOutput {
        bucket: "RACXW-PR".into(),
        transforms: Vec::new(),
        write: WriteOptions::default(),
        use_required_column: false,
        proof: None,
    };
    j.proof_jobs = vec![proof_job("EXC", vec![input], vec![pr], licensed_first())];
    j
}

/// PU lists carry a first name and a credit amount to format; PO lists go
/// through as sent. Every bucket is written UTF-8 with a byte-order mark.
fn inactive_input(file: &str, kind: &str) -> (ProofInput, Vec<BucketOutput>) {
    let bucket = |tag: &str| format!("{tag}-{kind}");
    let (required, transforms) = if kind == "PU" {
        (
            vec![VERSION, "First Name", "CREDIT"],
            vec![
                Transform::Uppercase {
                    column: "First Name".into(),
                    into: None,
                },
                Transform::Currency {
                    column: "CREDIT".into(),
                },
            ],
        )
    } else {
        (vec![VERSION], Vec::new())
    };
    let input = ProofInput {
        file: file.to_string(),
        schema: Some(SourceSchema::new("inactive", &required)),
        transforms,
        split_column: VERSION.into(),
        rules: ["PR", "AT", "A"]
            .iter()
            .map(|&t| SplitRule::new(&bucket(t), Matcher::Suffix(format!("-{}", bucket(t)))))
            .collect(),
        combined: None,
    };
    let buckets = ["PR", "AT", "A"]
        .iter()
        .map(|&t| BucketOutput {
            bucket: bucket(t),
            transforms: if t == "PR" {
                vec![
                    Transform::ReplacePrefix {
                        column: "EXPIRES".into(),
                        keep_from: 29,
                        message: "La oferta es válida hasta el ".into(),
                    },
                    Transform::ZipPad {
                        column: "SZIP".into(),
                    },
                ]
            } else {
                Vec::new()
            },
            write: utf8_bom(),
            use_required_column: true,
            proof: None,
        })
        .collect();
    (input, buckets)
}

fn inactive() -> JobConfig {
    let mut j = job(
        "INACTIVE",
        "INACTIVE_2310-DM07/FOLDERS",
        "INACTIVE_2310-DM07",
        "INACTIVE PROOFS",
        &["201504"],
    );
    j.input_steps = vec![InputStep::RenameByValueSuffix {
        column: VERSION.into(),
        renames: vec![
            SuffixRename {
                suffix: "-PU".into(),
                name: "APU.txt".into(),
            },
            SuffixRename {
                suffix: "-PO".into(),
                name: "APO.txt".into(),
            },
        ],
        expect: Some(2),
        extension: "txt".into(),
    }];
    j.proof_jobs = [("APU.txt", "PU"), ("APO.txt", "PO")]
        .iter()
        .map(|(file, kind)| {
            let (input, buckets) = inactive_input(file, kind);
            proof_job(
                &format!("INACTIVE {kind}"),
                vec![input],
                buckets,
                ProofSpec::default().with_required("Store_License"),
            )
        })
        .collect();
    j
}

/// `<n>-A` style proof job: the plain and price-reduced buckets of one
/// NCWO output file.
fn ncwo_proof(n: u8, kind: &str) -> ProofJob {
    let plain = format!("{n}-{kind}");
    let reduced = format!("{n}-{}", if kind == "A" { "PR" } else { "APPR" });
    let mut transforms = vec![
        Transform::Uppercase {
            column: "First Name".into(),
            into: Some("FIRST_NAME".into()),
        },
        Transform::FixSpanishAccents {
            columns: Vec::new(),
        },
    ];
    let mut critical = strings(&NCWO_CRITICAL);
    if kind == "AP" {
        for c in ["TOTAL", "WEEKLY"] {
            transforms.push(Transform::Currency { column: c.into() });
            critical.push(c.into());
        }
    } else {
        critical.push("CUSTOM_05".into());
    }
    transforms.push(Transform::NullTokens {
        values: strings(&["nan", "NAN", "$nan"]),
    });
    transforms.push(Transform::SortNumeric {
        column: "Sort Position".into(),
    });
    ProofJob {
        name: format!("NCWO {plain}"),
        inputs: vec![ProofInput {
            file: format!("{plain}_OUTPUT.csv"),
            schema: Some(SourceSchema::new("ncwo", &[VERSION, "VERSION", "First Name", "Sort Position"])),
            transforms,
            split_column: "VERSION".into(),
            rules: vec![
                SplitRule::new(&plain, Matcher::Exact(plain.clone())),
                SplitRule::new(&reduced, Matcher::Exact(reduced.clone())),
            ],
            combined: None,
        }],
        buckets: vec![BucketOutput {
            bucket: reduced,
            transforms: vec![
                Transform::SpanishDate {
                    column: "START_DATE".into(),
                },
                Transform::SpanishDate {
                    column: "END_DATE".into(),
                },
            ],
            write: cp1252(),
            use_required_column: false,
            proof: None,
        }],
        proof: Some(ProofSpec {
            critical_columns: critical,
            ..ProofSpec::default()
        }
        .with_required("Store_License")),
        output_dir: "OUTPUT".into(),
        proof_dir: "PROOF".into(),
    }
}

fn ncwo() -> JobConfig {
    let mut j = job("NCWO", "NCWO_4TH/DM03", "NCWO_4TH", "NCWO PROOFS", &["201903"]);
    let mut rules = Vec::new();
    for n in 1..=2 {
        for tag in ["APPR", "AP", "PR", "A"] {
            let bucket = format!("{n}-{tag}");
            let code = format!("RAC2504-DM04-NCWO{n}-{tag}");
            rules.push(SplitRule::new(&bucket, Matcher::Exact(code)));
        }
    }
    j.input_steps = vec![InputStep::CombineAndSplit {
        header: strings(&NCWO_HEADER),
        combined: "ALLINPUT.csv".into(),
        version_column: VERSION.into(),
        rules,
        date_range: Some(DateRangeColumns {
            column: "CUSTOM_04".into(),
            start: "START_DATE".into(),
            end: "END_DATE".into(),
        }),
        extension: "txt".into(),
    }];
    j.proof_jobs = vec![
        ncwo_proof(1, "A"),
        ncwo_proof(1, "AP"),
        ncwo_proof(2, "A"),
        ncwo_proof(2, "AP"),
    ];
    j
}

fn prepif() -> JobConfig {
    let mut j = job("PREPIF", "PREPIF/FOLDERS", "PREPIF", "PREPIF PROOFS", &["202303"]);
    j.input_steps = vec![InputStep::RenameByPattern {
        renames: vec![
            PatternRename {
                pattern: "Pre-PIF_Prod_ALL_Files_HHG".into(),
                name: "PREPIF.txt".into(),
            },
            PatternRename {
                pattern: "DM001".into(),
                name: "PIF.txt".into(),
            },
        ],
        extension: "txt".into(),
    }];
    j.proof_jobs = vec![prepif_proof()];
    j
}

/// PRE_PIF.csv: END DATE runs 54 days past BEGIN DATE. PR rows get
/// day-first dates and a cp1252 file with the first rows as proof; the rest
/// go to the US bucket with a licensed row in a random proof.
fn prepif_proof() -> ProofJob {
    let quote_all = WriteOptions::quote_all();
    let input = ProofInput {
        file: "PRE_PIF.csv".into(),
        schema: Some(SourceSchema::new("prepif", &[VERSION, "BEGIN DATE"])),
        transforms: vec![
            Transform::ReformatDate {
                column: "BEGIN DATE".into(),
                format: US_DATE.into(),
            },
            Transform::ShiftDate {
                from: "BEGIN DATE".into(),
                into: "END DATE".into(),
                days: 54,
                format: US_DATE.into(),
            },
        ],
        split_column: VERSION.into(),
        rules: vec![
            SplitRule::new("PRE_PIF-PR", Matcher::Contains("PR".into())),
            SplitRule::new("PRE_PIF-US", Matcher::Regex(".*".into())),
        ],
        combined: None,
    };
    let pr = BucketOutput {
        bucket: "PRE_PIF-PR".into(),
        transforms: vec![Transform::ReformatDate {
            column: "END DATE".into(),
            format: "%d/%m/%Y".into(),
        }],
        write: WriteOptions {
            encoding: TextEncoding::Windows1252,
            ..quote_all.clone()
        },
        use_required_column: false,
        proof: Some(ProofSpec::default().first_rows()),
    };
    let us = BucketOutput {
        bucket: "PRE_PIF-US".into(),
        transforms: Vec::new(),
        write: quote_all,
        use_required_column: true,
        proof: None,
    };
    proof_job(
        "PREPIF",
        vec![input],
        vec![pr, us],
        ProofSpec::default().with_required("Store_License"),
    )
}

/// Report groups in match order: the AP groups precede the A groups they
/// would otherwise be swallowed by.
fn count_groups() -> Vec<CountGroup> {
    let c = |v: &str| Matcher::Contains(v.to_string());
    let mut groups = vec![
        CountGroup::new("CBC2", vec![Matcher::Prefix("RAC2404-DM07".into())]),
        CountGroup::new("CBC3", vec![Matcher::Prefix("RAC2401-DM03".into())]),
        CountGroup::new("EXC", vec![c("RACXW")]),
        CountGroup::new("PREPIF", vec![c("PPIF")]),
    ];
    for kind in ["PO", "PU"] {
        groups.push(CountGroup::new(
            &format!("INACTIVE A-{kind}"),
            vec![c(&format!("-A-{kind}")), c(&format!("-PR-{kind}"))],
        ));
    }
    for kind in ["PO", "PU"] {
        groups.push(CountGroup::new(
            &format!("INACTIVE AT-{kind}"),
            vec![c(&format!("-AT-{kind}"))],
        ));
    }
    for n in 1..=2 {
        groups.push(CountGroup::new(
            &format!("NCWO {n}-AP"),
            vec![c(&format!("NCWO{n}-AP")), c(&format!("NCWO{n}-APPR"))],
        ));
        groups.push(CountGroup::new(
            &format!("NCWO {n}-A"),
            vec![c(&format!("NCWO{n}-A")), c(&format!("NCWO{n}-PR"))],
        ));
    }
    groups
}

fn section(job: &str, title: &str, labels: &[(&str, &[&str])]) -> CountSection {
    CountSection {
        job: job.to_string(),
        title: title.to_string(),
        labels: labels.iter().map(|(l, vs)| CountLabel::new(l, vs)).collect(),
    }
}

/// Output breakdowns by version. AT versions count with their A label.
fn count_sections() -> Vec<CountSection> {
    let mut sections = vec![
        section(
            "CBC",
            "CBC2",
            &[
                ("CBC2 PR", &["RAC2404-DM07-CBC2-PR"]),
                ("CBC2 CANC", &["RAC2404-DM07-CBC2-CANC"]),
                ("CBC2 US", &["RAC2404-DM07-CBC2-A"]),
            ],
        ),
        section(
            "CBC",
            "CBC3",
            &[
                ("CBC3 PR", &["RAC2401-DM03-PR"]),
                ("CBC3 CANC", &["RAC2401-DM03-CANC"]),
                ("CBC3 US", &["RAC2401-DM03-A"]),
            ],
        ),
        section(
            "EXC",
            "EXC",
            &[
                ("EXC PR", &["RAC2406-DM03-RACXW-PR"]),
                ("EXC US", &["RAC2406-DM03-RACXW-A"]),
            ],
        ),
        section(
            "INACTIVE",
            "INACTIVE",
            &[
                ("INACTIVE A-PO PR", &["RAC2504-DM03-PR-PO"]),
                ("INACTIVE A-PO US", &["RAC2504-DM03-A-PO", "RAC2504-DM03-AT-PO"]),
                ("INACTIVE A-PU PR", &["RAC2501-DM06-PR-PU"]),
                ("INACTIVE A-PU US", &["RAC2504-DM03-A-PU", "RAC2504-DM03-AT-PU"]),
            ],
        ),
    ];
    let ncwo = (1..=2)
        .flat_map(|n| {
            [("A", "PR"), ("AP", "APPR")].into_iter().flat_map(move |(kind, pr)| {
                let base = format!("RAC2504-DM04-NCWO{n}-");
                [
                    CountLabel {
                        label: format!("NCWO {n}-{kind} PR"),
                        versions: vec![format!("{base}{pr}")],
                    },
                    CountLabel {
                        label: format!("NCWO {n}-{kind} US"),
                        versions: vec![format!("{base}{kind}")],
                    },
                ]
            })
        })
        .collect();
    sections.push(CountSection {
        job: "NCWO".into(),
        title: "NCWO".into(),
        labels: ncwo,
    });
    sections.push(section(
        "PREPIF",
        "PREPIF",
        &[
            ("PREPIF PR", &["RAC2504-DM05-PPIF-PR"]),
            ("PREPIF US", &["RAC2504-DM05-PPIF-A"]),
        ],
    ));
    sections
}

fn counts() -> CountsConfig {
    let v = VERSION;
    CountsConfig {
        groups: count_groups(),
        inputs: vec![
            CountSource::new("CBC", "INPUT", "*.txt", v),
            CountSource::new("EXC", "INPUT", "*.txt", v),
            CountSource::new("INACTIVE", "INPUT", "*.txt", v),
            CountSource::new("NCWO", "INPUT", "ALLINPUT.csv", v),
            CountSource::new("PREPIF", "INPUT", "*.txt", v),
        ],
        outputs: vec![
            CountSource::new("CBC", "OUTPUT", "*.csv", v),
            CountSource::new("EXC", "OUTPUT", "*.csv", v),
            CountSource::new("INACTIVE", "OUTPUT", "*.csv", v),
            CountSource::new("NCWO", "OUTPUT", "*_OUTPUT.csv", v),
            CountSource::new("PREPIF", "OUTPUT", "*.csv", v),
        ],
        sections: count_sections(),
        ..CountsConfig::default()
    }
}

/// Stray quotes only matter in what goes to the presort software and the
/// proofs, so raw INPUT lists are not scanned.
pub(super) fn quote_scan_dirs(jobs: &[JobConfig]) -> Vec<PathBuf> {
    jobs.iter()
        .flat_map(|j| [j.working_dir.join("OUTPUT"), j.working_dir.join("PROOF")])
        .collect()
}

pub(super) fn rac_weekly() -> Config {
    let jobs = vec![cbc(), exc(), inactive(), ncwo(), prepif()];
    let quotes = QuotesConfig {
        scan_dirs: quote_scan_dirs(&jobs),
        ..QuotesConfig::default()
    };
    Config {
        root: PathBuf::from("."),
        ledger_dir: PathBuf::from("LEDGER"),
        handoff: HandoffConfig::default(),
        intake: IntakeConfig::default(),
        jobs,
        counts: counts(),
        quotes,
        proof: ProofSpec::default().with_required("Store_License"),
        break_mark: BreakMarkSpec::default(),
    }
}
