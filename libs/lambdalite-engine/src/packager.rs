// Code packager: turns submitted source into a single deployable file
use lambdalite_common::types::Language;
use uuid::Uuid;

/// Calls `handler(event)` with an empty event when the module defines one
/// and prints whatever it returns. Plain scripts run unchanged.
const PYTHON_TRAILER: &str = r#"
if __name__ == "__main__":
    _handler = globals().get("handler")
    if callable(_handler):
        _result = _handler({})
        if _result is not None:
            print(_result)
"#;

/// A source file ready to be delivered into an execution environment
#[derive(Debug, Clone)]
pub struct PackagedCode {
    pub language: Language,
    pub file_name: String,
    pub contents: String,
}

impl PackagedCode {
    /// Shell invocation running this file from the working directory
    pub fn command(&self, work_dir: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cd {} && {}", work_dir, self.language.run_command(&self.file_name)),
        ]
    }

    /// Shell invocation deleting this file once the run is over
    pub fn cleanup_command(&self, work_dir: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("rm -f {}/{}", work_dir, self.file_name),
        ]
    }
}

pub fn package(language: Language, source_code: &str) -> PackagedCode {
    let file_name = format!("{}.{}", Uuid::new_v4(), language.file_extension());

    let contents = if language.wraps_handler() {
        let mut wrapped = String::with_capacity(source_code.len() + PYTHON_TRAILER.len() + 1);
        wrapped.push_str(source_code);
        if !source_code.ends_with('\n') {
            wrapped.push('\n');
        }
        wrapped.push_str(PYTHON_TRAILER);
        wrapped
    } else {
        source_code.to_string()
    };

    PackagedCode {
        language,
        file_name,
        contents,
    }
}
