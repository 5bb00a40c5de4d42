//! Starter programs per language.
//!
//! Each template prompts for a line on stdin so a fresh run exercises the
//! interactive path.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Languages the runner accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    C,
    Cpp,
    Java,
    Go,
    Ruby,
}

impl Language {
    /// Every supported language.
    pub const ALL: [Self; 7] = [
        Self::Python,
        Self::Javascript,
        Self::C,
        Self::Cpp,
        Self::Java,
        Self::Go,
        Self::Ruby,
    ];

    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
            Self::Go => "go",
            Self::Ruby => "ruby",
        }
    }

    /// Starter program.
    #[must_use]
    pub const fn template(self) -> &'static str {
        match self {
            Self::Python => PYTHON,
            Self::Javascript => JAVASCRIPT,
            Self::C => C,
            Self::Cpp => CPP,
            Self::Java => JAVA,
            Self::Go => GO,
            Self::Ruby => RUBY,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown language name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "js" | "node" => return Ok(Self::Javascript),
            "c++" => return Ok(Self::Cpp),
            "py" => return Ok(Self::Python),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str() == lower)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

const PYTHON: &str = r#"color = input("enter color: ")
print("Your favorite color is:", color)"#;

const JAVASCRIPT: &str = r#"const readline = require('readline').createInterface({
  input: process.stdin,
  output: process.stdout
});
readline.question("enter color: ", color => {
  console.log("Your favorite color is:", color);
  readline.close();
  process.exit(0);
});"#;

const C: &str = r#"#include <stdio.h>
int main() {
    char color[100];
    printf("enter color: ");
    scanf("%s", color);
    printf("Your favorite color is: %s", color);
    return 0;
}"#;

const CPP: &str = r#"#include <iostream>
using namespace std;
int main() {
    string color;
    cout << "enter color: ";
    cin >> color;
    cout << "Your favorite color is: " << color;
    return 0;
}"#;

const JAVA: &str = r#"import java.util.*;
public class Main {
    public static void main(String[] args) {
        Scanner sc = new Scanner(System.in);
        System.out.print("enter color: ");
        String color = sc.nextLine();
        System.out.println("Your favorite color is: " + color);
    }
}"#;

const GO: &str = r#"package main

import (
    "bufio"
    "fmt"
    "os"
)

func main() {
    reader := bufio.NewReader(os.Stdin)
    fmt.Print("enter color: ")
    color, _ := reader.ReadString('\n')
    fmt.Printf("Your favorite color is: %s", color)
}"#;

const RUBY: &str = r#"print "enter color: "
STDOUT.flush
color = gets.chomp
puts "Your favorite color is: #{color}"
"#;
