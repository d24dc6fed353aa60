//! Built-in example diagrams.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagramExample {
    pub id: &'static str,
    pub name: &'static str,
    pub code: &'static str,
}

pub static EXAMPLES: [DiagramExample; 4] = [
    DiagramExample {
        id: "flowchart",
        name: "Flowchart",
        code: "flowchart TD
    A[Start] --> B{Is it working?}
    B -->|Yes| C[Great!]
    B -->|No| D[Debug]
    D --> B
    C --> E[End]",
    },
    DiagramExample {
        id: "sequence",
        name: "Sequence",
        code: "sequenceDiagram
    participant User
    participant System
    User->>System: Login Request
    System-->>User: Validate Credentials
    alt Valid
        System->>User: Token
    else Invalid
        System->>User: Error
    end",
    },
    DiagramExample {
        id: "mindmap",
        name: "Mind Map",
        code: "mindmap
  root((Mermaid))
    Origins
      Long history
      Open Source
    Features
      Flowcharts
      Sequence Diagrams
      Gantt Charts
    Usage
      Documentation
      Live Editor",
    },
    DiagramExample {
        id: "broken",
        name: "Broken (Test AI)",
        code: "flowchart TD
    A[Start] --> B{Missing Bracket
    B --> C[End]",
    },
];

pub fn initial_code() -> &'static str {
    EXAMPLES[0].code
}

pub fn find_example(id: &str) -> Option<&'static DiagramExample> {
    EXAMPLES
        .iter()
        .find(|example| example.id.eq_ignore_ascii_case(id.trim()))
}

pub fn example_ids() -> Vec<&'static str> {
    EXAMPLES.iter().map(|example| example.id).collect()
}
