//! Primary technology detection from repository paths

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    ReactNative,
    Flutter,
    Swift,
    Kotlin,
    JavaAndroid,
    Web,
    Other,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::ReactNative => "react-native",
            Platform::Flutter => "flutter",
            Platform::Swift => "swift",
            Platform::Kotlin => "kotlin",
            Platform::JavaAndroid => "java-android",
            Platform::Web => "web",
            Platform::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Classify a repository from its file paths.
///
/// Checks run in a fixed priority order and the first match wins, so a
/// React Native app that also ships `.kt` sources is still `ReactNative`.
pub fn detect_platform<S: AsRef<str>>(paths: &[S]) -> Platform {
    let paths: Vec<String> = paths.iter().map(|p| p.as_ref().to_lowercase()).collect();

    let has_file = |name: &str| paths.iter().any(|p| file_name(p) == name);
    let has_ext = |ext: &str| paths.iter().any(|p| p.ends_with(ext));
    let has_dir = |dir: &str| {
        let nested = format!("/{}/", dir);
        let root = format!("{}/", dir);
        paths.iter().any(|p| p.starts_with(&root) || p.contains(&nested))
    };

    let checks: [(Platform, bool); 6] = [
        (
            Platform::ReactNative,
            has_file("metro.config.js")
                || has_file("react-native.config.js")
                || (has_file("app.json") && has_file("package.json"))
                || (has_file("package.json") && (has_dir("ios") || has_dir("android"))),
        ),
        (Platform::Flutter, has_file("pubspec.yaml") || has_ext(".dart")),
        (
            Platform::Swift,
            has_ext(".swift")
                || has_file("package.swift")
                || paths.iter().any(|p| p.contains(".xcodeproj") || p.contains(".xcworkspace")),
        ),
        (Platform::Kotlin, has_ext(".kt") || has_ext(".kts")),
        (
            Platform::JavaAndroid,
            has_file("androidmanifest.xml") || (has_ext(".java") && has_file("build.gradle")),
        ),
        (
            Platform::Web,
            has_file("package.json")
                || has_ext(".html")
                || has_ext(".jsx")
                || has_ext(".tsx")
                || has_ext(".vue")
                || has_ext(".svelte"),
        ),
    ];

    checks
        .into_iter()
        .find_map(|(platform, matched)| matched.then_some(platform))
        .unwrap_or(Platform::Other)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_each_platform() {
        assert_eq!(
            detect_platform(&["package.json", "android/app/build.gradle", "App.js"]),
            Platform::ReactNative
        );
        assert_eq!(detect_platform(&["pubspec.yaml", "lib/main.dart"]), Platform::Flutter);
        assert_eq!(detect_platform(&["Sources/App/main.swift"]), Platform::Swift);
        assert_eq!(detect_platform(&["app/src/main/MainActivity.kt"]), Platform::Kotlin);
        assert_eq!(
            detect_platform(&["app/src/main/AndroidManifest.xml", "Main.java"]),
            Platform::JavaAndroid
        );
        assert_eq!(
            detect_platform(&["build.gradle", "src/Main.java"]),
            Platform::JavaAndroid
        );
        assert_eq!(detect_platform(&["index.html", "style.css"]), Platform::Web);
        assert_eq!(detect_platform(&["src/main.rs", "Cargo.toml"]), Platform::Other);
    }

    #[test]
    fn test_priority_order() {
        // Flutter projects carry ios/ and android/ trees with Swift and Kotlin
        let flutter = [
            "pubspec.yaml",
            "lib/main.dart",
            "ios/Runner/AppDelegate.swift",
            "android/app/src/main/kotlin/MainActivity.kt",
        ];
        assert_eq!(detect_platform(&flutter), Platform::Flutter);

        let react_native = ["package.json", "metro.config.js", "ios/App.swift", "App.tsx"];
        assert_eq!(detect_platform(&react_native), Platform::ReactNative);

        let swift_and_kotlin = ["Shared.kt", "App.swift"];
        assert_eq!(detect_platform(&swift_and_kotlin), Platform::Swift);
    }

    #[test]
    fn test_plain_java_is_other() {
        assert_eq!(detect_platform(&["src/Main.java", "pom.xml"]), Platform::Other);
    }

    #[test]
    fn test_empty_listing() {
        let empty: [&str; 0] = [];
        assert_eq!(detect_platform(&empty), Platform::Other);
    }

    #[test]
    fn test_deterministic() {
        let paths = vec!["web/index.html".to_string(), "README.md".to_string()];
        assert_eq!(detect_platform(&paths), detect_platform(&paths));
        assert_eq!(detect_platform(&paths), Platform::Web);
    }
}
