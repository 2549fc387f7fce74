// ABOUTME: Declarative language registry mapping language ids to images and launch commands
// ABOUTME: Derives class-bound source filenames for Java by lexical scan

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// Registry entry for one supported language, immutable after startup
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub id: &'static str,
    /// Container image the sandbox runs on
    pub image: &'static str,
    /// File extension for interpreted/compiled source
    pub extension: &'static str,
    /// Whether the launch command compiles before running
    pub supports_compile: bool,
    /// Default filename when no class name can be derived
    default_filename: &'static str,
}

lazy_static! {
    static ref LANGUAGES: HashMap<&'static str, LanguageSpec> = {
        let mut languages = HashMap::new();

        languages.insert(
            "python",
            LanguageSpec {
                id: "python",
                image: "python:3.9-alpine",
                extension: "py",
                supports_compile: false,
                default_filename: "main.py",
            },
        );

        languages.insert(
            "javascript",
            LanguageSpec {
                id: "javascript",
                image: "node:16-alpine",
                extension: "js",
                supports_compile: false,
                default_filename: "main.js",
            },
        );

        languages.insert(
            "cpp",
            LanguageSpec {
                id: "cpp",
                image: "gcc:9-alpine",
                extension: "cpp",
                supports_compile: true,
                default_filename: "main.cpp",
            },
        );

        languages.insert(
            "java",
            LanguageSpec {
                id: "java",
                image: "openjdk:11-alpine",
                extension: "java",
                supports_compile: true,
                default_filename: "Main.java",
            },
        );

        languages
    };

    // Lexical, not a parser: the first matching token is authoritative.
    static ref JAVA_PUBLIC_CLASS: Regex =
        Regex::new(r"public\s+class\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap();
    static ref JAVA_ANY_CLASS: Regex =
        Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap();
}

/// Look up a language spec by id
pub fn lookup(id: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.get(id)
}

/// List all registered language ids
pub fn registered_ids() -> Vec<&'static str> {
    LANGUAGES.keys().copied().collect()
}

/// Images required by the registry, for startup pre-pulling
pub fn registry_images() -> Vec<&'static str> {
    LANGUAGES.values().map(|spec| spec.image).collect()
}

impl LanguageSpec {
    /// Derive the filename the source must be written under.
    ///
    /// Java binds the filename to the declared public class: the first
    /// `public class` identifier wins, then any `class` identifier, then
    /// the fixed default.
    pub fn source_filename(&self, source: &str) -> String {
        if self.id != "java" {
            return self.default_filename.to_string();
        }

        JAVA_PUBLIC_CLASS
            .captures(source)
            .or_else(|| JAVA_ANY_CLASS.captures(source))
            .map(|caps| format!("{}.{}", &caps[1], self.extension))
            .unwrap_or_else(|| self.default_filename.to_string())
    }

    /// Build the container command for one execution.
    ///
    /// The supervisor sees a single shell invocation and one exit code; for
    /// compiled languages the command compiles then runs. When a stdin file
    /// is present the run stage reads from it.
    pub fn launch_command(&self, source_filename: &str, has_stdin: bool) -> Vec<String> {
        let stdin_redirect = if has_stdin { " < input.txt" } else { "" };

        let script = match self.id {
            "python" => format!("python3 {}{}", source_filename, stdin_redirect),
            "javascript" => format!("node {}{}", source_filename, stdin_redirect),
            "cpp" => format!(
                "g++ -O2 -o /tmp/a.out {} && /tmp/a.out{}",
                source_filename, stdin_redirect
            ),
            "java" => {
                let class_name = source_filename.trim_end_matches(".java");
                format!(
                    "javac {} && java -cp /app {}{}",
                    source_filename, class_name, stdin_redirect
                )
            }
            other => format!("echo 'unsupported language: {}'; exit 1", other),
        };

        vec!["/bin/sh".to_string(), "-c".to_string(), script]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_languages() {
        for id in ["python", "javascript", "cpp", "java"] {
            let spec = lookup(id).unwrap();
            assert_eq!(spec.id, id);
            assert!(!spec.image.is_empty());
        }
        assert!(lookup("cobol").is_none());
    }

    #[test]
    fn test_registry_images() {
        let images = registry_images();
        assert_eq!(images.len(), 4);
        assert!(images.contains(&"python:3.9-alpine"));
        assert!(images.contains(&"openjdk:11-alpine"));
    }

    #[test]
    fn test_non_java_filenames_are_fixed() {
        assert_eq!(
            lookup("python").unwrap().source_filename("print('x')"),
            "main.py"
        );
        assert_eq!(lookup("cpp").unwrap().source_filename("int main(){}"), "main.cpp");
    }

    #[test]
    fn test_java_filename_from_public_class() {
        let spec = lookup("java").unwrap();
        let source = "public class Solution { public static void main(String[] a) {} }";
        assert_eq!(spec.source_filename(source), "Solution.java");
    }

    #[test]
    fn test_java_filename_falls_back_to_any_class() {
        let spec = lookup("java").unwrap();
        assert_eq!(spec.source_filename("class Helper {}"), "Helper.java");
    }

    #[test]
    fn test_java_filename_default_when_no_class() {
        let spec = lookup("java").unwrap();
        assert_eq!(spec.source_filename("int x = 1;"), "Main.java");
    }

    #[test]
    fn test_java_first_public_class_wins() {
        let spec = lookup("java").unwrap();
        let source = "class A {}\npublic class B {}\npublic class C {}";
        assert_eq!(spec.source_filename(source), "B.java");
    }

    #[test]
    fn test_launch_command_single_shot() {
        let cmd = lookup("python").unwrap().launch_command("main.py", false);
        assert_eq!(cmd[0], "/bin/sh");
        assert_eq!(cmd[1], "-c");
        assert_eq!(cmd[2], "python3 main.py");
    }

    #[test]
    fn test_launch_command_with_stdin() {
        let cmd = lookup("python").unwrap().launch_command("main.py", true);
        assert_eq!(cmd[2], "python3 main.py < input.txt");
    }

    #[test]
    fn test_launch_command_compile_then_run() {
        let cmd = lookup("cpp").unwrap().launch_command("main.cpp", false);
        assert!(cmd[2].contains("g++"));
        assert!(cmd[2].contains("&&"));

        let cmd = lookup("java").unwrap().launch_command("Solution.java", true);
        assert_eq!(
            cmd[2],
            "javac Solution.java && java -cp /app Solution < input.txt"
        );
    }
}
