#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// What the current user is allowed to see. Derived once from the role and
/// passed into rendering instead of checking the role in every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Create courses/lessons and edit quizzes.
    pub can_author: bool,
    /// See the per-student progress table of a course.
    pub can_view_roster: bool,
}

impl Capabilities {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Teacher => Self {
                can_author: true,
                can_view_roster: true,
            },
            Role::Student => Self {
                can_author: false,
                can_view_roster: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teachers_get_authoring_and_roster() {
        let caps = Capabilities::for_role(Role::Teacher);
        assert!(caps.can_author);
        assert!(caps.can_view_roster);
    }

    #[test]
    fn students_get_neither() {
        let caps = Capabilities::for_role(Role::Student);
        assert!(!caps.can_author);
        assert!(!caps.can_view_roster);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"teacher\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"student\"").unwrap(),
            Role::Student
        );
    }
}
