use super::{IdSet, RelationGraph};
use crate::error::CoreResult;
use crate::model::{MembershipKind, Role};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug)]
struct UserNode {
    id: String,
    role: Role,
    children: BTreeSet<usize>,
    parents: BTreeSet<usize>,
    group: Option<usize>,
}

#[derive(Debug, Default)]
struct CourseNode {
    id: String,
    teachers: BTreeSet<usize>,
    students: BTreeSet<usize>,
}

#[derive(Debug, Default)]
struct GroupNode {
    id: String,
    curator: Option<usize>,
    members: BTreeSet<usize>,
}

/// In-memory relation graph: arena-allocated nodes addressed by index, with
/// both directions of every association mutated through one method.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    users: Vec<UserNode>,
    user_index: HashMap<String, usize>,
    courses: Vec<CourseNode>,
    course_index: HashMap<String, usize>,
    groups: Vec<GroupNode>,
    group_index: HashMap<String, usize>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, id: &str, role: Role) -> &mut Self {
        if !self.user_index.contains_key(id) {
            self.user_index.insert(id.to_string(), self.users.len());
            self.users.push(UserNode {
                id: id.to_string(),
                role,
                children: BTreeSet::new(),
                parents: BTreeSet::new(),
                group: None,
            });
        }
        self
    }

    pub fn add_course(&mut self, id: &str) -> &mut Self {
        if !self.course_index.contains_key(id) {
            self.course_index.insert(id.to_string(), self.courses.len());
            self.courses.push(CourseNode {
                id: id.to_string(),
                ..CourseNode::default()
            });
        }
        self
    }

    pub fn add_group(&mut self, id: &str) -> &mut Self {
        if !self.group_index.contains_key(id) {
            self.group_index.insert(id.to_string(), self.groups.len());
            self.groups.push(GroupNode {
                id: id.to_string(),
                ..GroupNode::default()
            });
        }
        self
    }

    pub fn enroll(&mut self, course_id: &str, user_id: &str, kind: MembershipKind) -> &mut Self {
        let c = self.course_index[course_id];
        let u = self.user_index[user_id];
        match kind {
            MembershipKind::Teacher => self.courses[c].teachers.insert(u),
            MembershipKind::Student => self.courses[c].students.insert(u),
        };
        self
    }

    pub fn set_curator(&mut self, group_id: &str, teacher_id: &str) -> &mut Self {
        let g = self.group_index[group_id];
        self.groups[g].curator = Some(self.user_index[teacher_id]);
        self
    }

    /// Moves the student out of any previous group.
    pub fn place_in_group(&mut self, group_id: &str, student_id: &str) -> &mut Self {
        let g = self.group_index[group_id];
        let u = self.user_index[student_id];
        if let Some(prev) = self.users[u].group.replace(g) {
            self.groups[prev].members.remove(&u);
        }
        self.groups[g].members.insert(u);
        self
    }

    pub fn link_parent(&mut self, parent_id: &str, child_id: &str) -> &mut Self {
        let p = self.user_index[parent_id];
        let c = self.user_index[child_id];
        self.users[p].children.insert(c);
        self.users[c].parents.insert(p);
        self
    }

    fn ids(&self, idx: &BTreeSet<usize>) -> IdSet {
        idx.iter().map(|&i| self.users[i].id.clone()).collect()
    }

    fn course(&self, id: &str) -> Option<&CourseNode> {
        self.course_index.get(id).map(|&i| &self.courses[i])
    }
}

impl RelationGraph for MemoryGraph {
    fn role_of(&self, user_id: &str) -> CoreResult<Option<Role>> {
        Ok(self.user_index.get(user_id).map(|&i| self.users[i].role))
    }

    fn group_exists(&self, group_id: &str) -> CoreResult<bool> {
        Ok(self.group_index.contains_key(group_id))
    }

    fn course_exists(&self, course_id: &str) -> CoreResult<bool> {
        Ok(self.course_index.contains_key(course_id))
    }

    fn courses_taught_by(&self, user_id: &str) -> CoreResult<IdSet> {
        let Some(&u) = self.user_index.get(user_id) else {
            return Ok(IdSet::new());
        };
        Ok(self
            .courses
            .iter()
            .filter(|c| c.teachers.contains(&u))
            .map(|c| c.id.clone())
            .collect())
    }

    fn courses_attended_by(&self, user_id: &str) -> CoreResult<IdSet> {
        let Some(&u) = self.user_index.get(user_id) else {
            return Ok(IdSet::new());
        };
        Ok(self
            .courses
            .iter()
            .filter(|c| c.students.contains(&u))
            .map(|c| c.id.clone())
            .collect())
    }

    fn teachers_of(&self, course_id: &str) -> CoreResult<IdSet> {
        Ok(self
            .course(course_id)
            .map(|c| self.ids(&c.teachers))
            .unwrap_or_default())
    }

    fn students_of(&self, course_id: &str) -> CoreResult<IdSet> {
        Ok(self
            .course(course_id)
            .map(|c| self.ids(&c.students))
            .unwrap_or_default())
    }

    fn group_curated_by(&self, user_id: &str) -> CoreResult<Option<String>> {
        let Some(&u) = self.user_index.get(user_id) else {
            return Ok(None);
        };
        Ok(self
            .groups
            .iter()
            .find(|g| g.curator == Some(u))
            .map(|g| g.id.clone()))
    }

    fn group_of(&self, student_id: &str) -> CoreResult<Option<String>> {
        Ok(self
            .user_index
            .get(student_id)
            .and_then(|&u| self.users[u].group)
            .map(|g| self.groups[g].id.clone()))
    }

    fn members_of(&self, group_id: &str) -> CoreResult<IdSet> {
        Ok(self
            .group_index
            .get(group_id)
            .map(|&g| self.ids(&self.groups[g].members))
            .unwrap_or_default())
    }

    fn children_of(&self, parent_id: &str) -> CoreResult<IdSet> {
        Ok(self
            .user_index
            .get(parent_id)
            .map(|&p| self.ids(&self.users[p].children))
            .unwrap_or_default())
    }

    fn parents_of(&self, student_id: &str) -> CoreResult<IdSet> {
        Ok(self
            .user_index
            .get(student_id)
            .map(|&c| self.ids(&self.users[c].parents))
            .unwrap_or_default())
    }

    fn all_students(&self) -> CoreResult<IdSet> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.role == Role::Student)
            .map(|u| u.id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_links_are_readable_both_ways() {
        let mut g = MemoryGraph::new();
        g.add_user("p1", Role::Parent)
            .add_user("p2", Role::Parent)
            .add_user("s1", Role::Student)
            .link_parent("p1", "s1")
            .link_parent("p2", "s1");

        assert_eq!(g.children_of("p1").unwrap(), IdSet::from(["s1".to_string()]));
        assert_eq!(
            g.parents_of("s1").unwrap(),
            IdSet::from(["p1".to_string(), "p2".to_string()])
        );
    }

    #[test]
    fn placing_in_a_new_group_moves_the_student() {
        let mut g = MemoryGraph::new();
        g.add_user("s1", Role::Student)
            .add_group("g1")
            .add_group("g2")
            .place_in_group("g1", "s1")
            .place_in_group("g2", "s1");

        assert!(g.members_of("g1").unwrap().is_empty());
        assert_eq!(g.members_of("g2").unwrap().len(), 1);
        assert_eq!(g.group_of("s1").unwrap().as_deref(), Some("g2"));
    }

    #[test]
    fn teaching_relation_goes_through_course_enrollment() {
        let mut g = MemoryGraph::new();
        g.add_user("t1", Role::Teacher)
            .add_user("s1", Role::Student)
            .add_user("s2", Role::Student)
            .add_course("c1")
            .enroll("c1", "t1", MembershipKind::Teacher)
            .enroll("c1", "s1", MembershipKind::Student);

        assert!(g.is_teaching_student("t1", "s1").unwrap());
        assert!(!g.is_teaching_student("t1", "s2").unwrap());
        assert_eq!(g.students_taught_by("t1").unwrap().len(), 1);
    }
}
