//! Per-language test plans, run through any instruction handler

use crate::protocol::SandboxInstruction;
use crate::router::InstructionHandler;
use coop_core::Language;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
    pub command: String,
    pub args: Vec<String>,
    /// A failing compile step ends the plan without running later steps
    pub compile: bool,
}

impl TestStep {
    fn run(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            compile: false,
        }
    }

    fn compile(command: &str, args: &[&str]) -> Self {
        Self {
            compile: true,
            ..Self::run(command, args)
        }
    }
}

/// Files to write and commands to run for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    pub files: Vec<(String, String)>,
    pub steps: Vec<TestStep>,
}

impl TestPlan {
    /// Plan that exercises `tests` against `code`
    ///
    /// `code` is written as given. `tests` may still be a raw model reply, so
    /// a fenced block is unwrapped when present.
    pub fn for_tests(language: Language, code: &str, tests: &str) -> Self {
        let code = code.to_string();
        let tests = if fenced_code_re().is_match(tests) {
            extract_code_block(tests, language)
        } else {
            tests.to_string()
        };
        let ext = language.extension();

        let steps = match language {
            Language::Python => vec![TestStep::run(
                "python",
                &["-m", "pytest", "-q", "test_main.py"],
            )],
            Language::JavaScript => vec![TestStep::run("node", &["test_main.js"])],
            Language::C => vec![
                TestStep::compile("gcc", &["main.c", "test_main.c", "-o", "test_runner"]),
                TestStep::run("./test_runner", &[]),
            ],
        };

        Self {
            files: vec![
                (format!("main.{}", ext), code),
                (format!("test_main.{}", ext), tests),
            ],
            steps,
        }
    }

    /// Plan that just runs the program once, with `code` written as given
    pub fn for_program(language: Language, code: &str) -> Self {
        let code = code.to_string();
        let steps = match language {
            Language::Python => vec![TestStep::run("python", &["main.py"])],
            Language::JavaScript => vec![TestStep::run("node", &["main.js"])],
            Language::C => vec![
                TestStep::compile("gcc", &["main.c", "-o", "test_runner"]),
                TestStep::run("./test_runner", &[]),
            ],
        };

        Self {
            files: vec![(format!("main.{}", language.extension()), code)],
            steps,
        }
    }
}

/// Write the plan's files and run its steps, returning the raw transcript
///
/// A compile failure returns the compile transcript and skips execution.
pub async fn run_test_plan<H>(handler: &H, plan: &TestPlan) -> String
where
    H: InstructionHandler + ?Sized,
{
    for (name, content) in &plan.files {
        let result = handler
            .handle(&SandboxInstruction::write_file(name.clone(), content.clone()).with_intent("test setup"))
            .await;
        if !result.is_success() {
            warn!("Could not write {} for test run: {:?}", name, result.message);
            return format!("Failed to write {}: {}", name, result.to_text());
        }
    }

    let mut transcript = String::from("No test steps were run");
    for step in &plan.steps {
        let result = handler
            .handle(
                &SandboxInstruction::execute(step.command.clone(), step.args.clone())
                    .with_intent("test run"),
            )
            .await;
        transcript = result.transcript();
        debug!("{} -> {:?}", step.command, result.exit_code);

        if step.compile && !result.is_success() {
            return format!("Compilation failed\n{}", transcript);
        }
        if !result.is_execution() {
            // Refused or failed to start: later steps depend on this one
            return transcript;
        }
    }
    transcript
}

fn fenced_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

/// Pull source out of model output
///
/// Prefers a fence tagged with the language, then an untagged fence, then any
/// fence. Text without fences is returned trimmed.
pub fn extract_code_block(text: &str, language: Language) -> String {
    let blocks: Vec<(String, &str)> = fenced_code_re()
        .captures_iter(text)
        .filter_map(|c| {
            let tag = c.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            c.get(2).map(|body| (tag, body.as_str()))
        })
        .collect();

    let pick = blocks
        .iter()
        .find(|(tag, _)| language.fence_tags().contains(&tag.as_str()))
        .or_else(|| blocks.iter().find(|(tag, _)| tag.is_empty()))
        .or_else(|| blocks.first());

    match pick {
        Some((_, body)) => body.trim_end().to_string() + "\n",
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::InstructionRouter;
    use tempfile::TempDir;

    #[test]
    fn test_extract_prefers_language_fence() {
        let text = "Here:\n```bash\npip install x\n```\n```python\nprint('hi')\n```";
        assert_eq!(extract_code_block(text, Language::Python), "print('hi')\n");
    }

    #[test]
    fn test_extract_without_fence() {
        assert_eq!(extract_code_block("  int x;  ", Language::C), "int x;");
    }

    #[test]
    fn test_c_plan_compiles_first() {
        let plan = TestPlan::for_tests(Language::C, "int add();", "int main(){}");
        assert_eq!(plan.files[0].0, "main.c");
        assert_eq!(plan.files[1].0, "test_main.c");
        assert!(plan.steps[0].compile);
        assert_eq!(plan.steps[1].command, "./test_runner");
    }

    #[test]
    fn test_plans_write_code_verbatim() {
        let code = "    indented = True\nprint(indented)\n";
        let plan = TestPlan::for_program(Language::Python, code);
        assert_eq!(plan.files[0].1, code);

        let plan = TestPlan::for_tests(Language::Python, code, "def test_x():\n    pass\n");
        assert_eq!(plan.files[0].1, code);
        assert_eq!(plan.files[1].1, "def test_x():\n    pass\n");
    }

    #[test]
    fn test_fenced_tests_are_unwrapped() {
        let plan = TestPlan::for_tests(
            Language::JavaScript,
            "module.exports = 1;\n",
            "Tests:\n```javascript\nconsole.log(require('./main'));\n```\n",
        );
        assert_eq!(plan.files[1].1, "console.log(require('./main'));\n");
    }

    #[tokio::test]
    async fn test_written_main_matches_input() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();
        let code = "print('hello')\n";

        run_test_plan(&router, &TestPlan::for_program(Language::Python, code)).await;
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            code
        );
    }

    #[test]
    fn test_python_plan_uses_pytest() {
        let plan = TestPlan::for_tests(Language::Python, "x", "y");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].args, vec!["-m", "pytest", "-q", "test_main.py"]);
    }

    #[tokio::test]
    async fn test_refused_compiler_stops_plan() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();
        let plan = TestPlan::for_tests(Language::C, "int a;", "int main(){return 0;}");

        let transcript = run_test_plan(&router, &plan).await;
        assert!(transcript.contains("Compilation failed"));
        assert!(transcript.contains("Command not allowed: gcc"));
        assert!(dir.path().join("main.c").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compile_failure_skips_execution() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(
            dir.path(),
            vec!["ls".to_string(), "./test_runner".to_string()],
            5,
        )
        .unwrap();
        // ls of a missing file stands in for a failing compiler
        let plan = TestPlan {
            files: vec![("main.c".to_string(), "int a;".to_string())],
            steps: vec![
                TestStep::compile("ls", &["missing.o"]),
                TestStep::run("./test_runner", &[]),
            ],
        };

        let transcript = run_test_plan(&router, &plan).await;
        assert!(transcript.starts_with("Compilation failed"));
        assert!(!transcript.contains("test_runner"));
    }
}
