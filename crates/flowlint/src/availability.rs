//! Context and special-function availability per workflow key.
//!
//! Expressions are not uniformly legal: each workflow key admits a fixed
//! set of contexts and special functions. The semantic checker consults
//! this table through [`availability_for`] with the normalized key path
//! (e.g. `jobs.<job_id>.steps.if`).

/// The contexts and special functions legal at one workflow key.
///
/// An empty `contexts` list means any context is allowed. An empty
/// `functions` list means no special function is allowed.
#[derive(Debug, Clone, Copy)]
pub struct Availability {
    pub key: &'static str,
    pub contexts: &'static [&'static str],
    pub functions: &'static [&'static str],
}

const NO_FUNCS: &[&str] = &[];
const STATUS_FUNCS: &[&str] = &["always", "success", "failure", "cancelled", "canceled"];
const STATUS_AND_HASH: &[&str] = &[
    "always",
    "success",
    "failure",
    "cancelled",
    "canceled",
    "hashfiles",
];
const HASH_ONLY: &[&str] = &["hashfiles"];

const JOB_BASE: &[&str] = &["github", "needs", "strategy", "matrix", "vars", "inputs"];
const JOB_IF: &[&str] = &["github", "needs", "vars", "inputs"];
const JOB_ENV: &[&str] = &[
    "github", "needs", "strategy", "matrix", "vars", "secrets", "inputs",
];
const JOB_DEFAULTS: &[&str] = &[
    "github", "needs", "strategy", "matrix", "env", "vars", "inputs",
];
const JOB_CREDENTIALS: &[&str] = &[
    "github", "needs", "strategy", "matrix", "env", "vars", "secrets", "inputs",
];
const CONTAINER_ENV: &[&str] = &[
    "github", "needs", "strategy", "matrix", "job", "runner", "env", "vars", "secrets", "inputs",
];
const JOB_OUTPUTS: &[&str] = &[
    "github", "needs", "strategy", "matrix", "job", "runner", "env", "vars", "secrets", "steps",
    "inputs",
];
const ENVIRONMENT_URL: &[&str] = &[
    "github", "needs", "strategy", "matrix", "job", "runner", "env", "vars", "steps", "inputs",
];
const STEP_ALL: &[&str] = &[
    "github", "needs", "strategy", "matrix", "job", "runner", "env", "vars", "secrets", "steps",
    "inputs",
];
const WORKFLOW_ENV: &[&str] = &["github", "secrets", "inputs", "vars"];
const WORKFLOW_SCALAR: &[&str] = &["github", "inputs", "vars"];
const CALL_OUTPUT: &[&str] = &["github", "jobs", "vars", "inputs"];

/// The availability table: workflow key path to allowed contexts/functions.
pub static AVAILABILITY: &[Availability] = &[
    Availability {
        key: "run-name",
        contexts: WORKFLOW_SCALAR,
        functions: NO_FUNCS,
    },
    Availability {
        key: "env",
        contexts: WORKFLOW_ENV,
        functions: NO_FUNCS,
    },
    Availability {
        key: "concurrency",
        contexts: WORKFLOW_SCALAR,
        functions: NO_FUNCS,
    },
    Availability {
        key: "on.workflow_call.inputs.<inputs_id>.default",
        contexts: WORKFLOW_SCALAR,
        functions: NO_FUNCS,
    },
    Availability {
        key: "on.workflow_call.outputs.<output_id>.value",
        contexts: CALL_OUTPUT,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.name",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.if",
        contexts: JOB_IF,
        functions: STATUS_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.runs-on",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.timeout-minutes",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.continue-on-error",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.concurrency",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.environment",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.environment.url",
        contexts: ENVIRONMENT_URL,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.env",
        contexts: JOB_ENV,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.defaults.run",
        contexts: JOB_DEFAULTS,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.outputs.<output_id>",
        contexts: JOB_OUTPUTS,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.strategy",
        contexts: JOB_ENV,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.container",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.container.credentials",
        contexts: JOB_CREDENTIALS,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.container.env",
        contexts: CONTAINER_ENV,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.services",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.services.<service_id>.credentials",
        contexts: JOB_CREDENTIALS,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.uses",
        contexts: &["none"],
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.with.<with_id>",
        contexts: JOB_BASE,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.secrets.<secrets_id>",
        contexts: JOB_ENV,
        functions: NO_FUNCS,
    },
    Availability {
        key: "jobs.<job_id>.steps.if",
        contexts: STEP_ALL,
        functions: STATUS_AND_HASH,
    },
    Availability {
        key: "jobs.<job_id>.steps.name",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
    Availability {
        key: "jobs.<job_id>.steps.run",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
    Availability {
        key: "jobs.<job_id>.steps.with",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
    Availability {
        key: "jobs.<job_id>.steps.env",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
    Availability {
        key: "jobs.<job_id>.steps.working-directory",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
    Availability {
        key: "jobs.<job_id>.steps.timeout-minutes",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
    Availability {
        key: "jobs.<job_id>.steps.continue-on-error",
        contexts: STEP_ALL,
        functions: HASH_ONLY,
    },
];

/// Looks up the availability row for a workflow key path.
pub fn availability_for(key: &str) -> Option<&'static Availability> {
    AVAILABILITY.iter().find(|row| row.key == key)
}
