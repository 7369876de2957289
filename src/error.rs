/// Errors that can occur while constructing a counted object.
///
/// Programmer errors reachable only through misuse of `unsafe` APIs, and
/// the thread-registry exhaustion condition, are not represented here: per
/// spec, those remain fatal (`panic!`/abort) rather than recoverable.
#[derive(thiserror::Error, Debug)]
pub enum CdrcError {
    #[error("allocation failed while constructing a counted object")]
    AllocationFailed,
}
