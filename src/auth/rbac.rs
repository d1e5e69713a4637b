//! Roles, permissions and the static role → permission table.

string_enum! {
    /// Job roles on a construction company account.
    pub enum UserRole {
        SuperAdmin => "super_admin",
        Admin => "admin",
        Directeur => "directeur",
        ChefProjet => "chef_projet",
        Superviseur => "superviseur",
        Technicien => "technicien",
        SousTraitant => "sous_traitant",
        Client => "client",
        Invite => "invite",
    }
}

string_enum! {
    pub enum Permission {
        ProjectCreate => "project:create",
        ProjectRead => "project:read",
        ProjectUpdate => "project:update",
        ProjectDelete => "project:delete",
        ProjectArchive => "project:archive",
        TaskCreate => "task:create",
        TaskRead => "task:read",
        TaskUpdate => "task:update",
        TaskDelete => "task:delete",
        TaskAssign => "task:assign",
        ReportCreate => "report:create",
        ReportRead => "report:read",
        ReportApprove => "report:approve",
        ReportExport => "report:export",
        RfiCreate => "rfi:create",
        RfiRead => "rfi:read",
        RfiRespond => "rfi:respond",
        RfiClose => "rfi:close",
        FinanceView => "finance:view",
        FinanceEdit => "finance:edit",
        FinanceApprove => "finance:approve",
        TeamView => "team:view",
        TeamManage => "team:manage",
        AdminUsers => "admin:users",
        AdminSettings => "admin:settings",
        AdminAudit => "admin:audit",
    }
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::Technicien
    }
}

use Permission::*;

const ADMIN: &[Permission] = &[
    ProjectCreate, ProjectRead, ProjectUpdate, ProjectDelete, ProjectArchive,
    TaskCreate, TaskRead, TaskUpdate, TaskDelete, TaskAssign,
    ReportCreate, ReportRead, ReportApprove, ReportExport,
    RfiCreate, RfiRead, RfiRespond, RfiClose,
    FinanceView, FinanceEdit, FinanceApprove,
    TeamView, TeamManage,
    AdminUsers, AdminSettings,
];

const DIRECTEUR: &[Permission] = &[
    ProjectCreate, ProjectRead, ProjectUpdate,
    TaskCreate, TaskRead, TaskUpdate, TaskAssign,
    ReportCreate, ReportRead, ReportApprove, ReportExport,
    RfiCreate, RfiRead, RfiRespond, RfiClose,
    FinanceView, FinanceEdit,
    TeamView, TeamManage,
];

const CHEF_PROJET: &[Permission] = &[
    ProjectRead, ProjectUpdate,
    TaskCreate, TaskRead, TaskUpdate, TaskAssign,
    ReportCreate, ReportRead, ReportExport,
    RfiCreate, RfiRead, RfiRespond,
    FinanceView,
    TeamView,
];

const SUPERVISEUR: &[Permission] = &[
    ProjectRead,
    TaskRead, TaskUpdate,
    ReportCreate, ReportRead,
    RfiCreate, RfiRead,
    TeamView,
];

const TECHNICIEN: &[Permission] = &[
    ProjectRead,
    TaskRead, TaskUpdate,
    ReportCreate, ReportRead,
    RfiCreate, RfiRead,
];

const SOUS_TRAITANT: &[Permission] = &[ProjectRead, TaskRead, ReportRead, RfiRead];

const CLIENT: &[Permission] = &[ProjectRead, ReportRead, RfiRead];

const INVITE: &[Permission] = &[ProjectRead];

impl UserRole {
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            UserRole::SuperAdmin => Permission::ALL,
            UserRole::Admin => ADMIN,
            UserRole::Directeur => DIRECTEUR,
            UserRole::ChefProjet => CHEF_PROJET,
            UserRole::Superviseur => SUPERVISEUR,
            UserRole::Technicien => TECHNICIEN,
            UserRole::SousTraitant => SOUS_TRAITANT,
            UserRole::Client => CLIENT,
            UserRole::Invite => INVITE,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn permission_strings(&self) -> Vec<String> {
        self.permissions().iter().map(|p| p.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_reads_projects_but_cannot_create() {
        assert!(UserRole::Client.has_permission(Permission::ProjectRead));
        assert!(!UserRole::Client.has_permission(Permission::ProjectCreate));
    }

    #[test]
    fn super_admin_has_every_permission() {
        for permission in Permission::ALL {
            assert!(UserRole::SuperAdmin.has_permission(*permission), "{permission}");
        }
    }

    #[test]
    fn admin_lacks_only_audit() {
        let missing: Vec<_> = Permission::ALL
            .iter()
            .filter(|p| !UserRole::Admin.has_permission(**p))
            .collect();
        assert_eq!(missing, vec![&Permission::AdminAudit]);
    }

    #[test]
    fn invite_is_read_only_on_projects() {
        assert_eq!(UserRole::Invite.permission_strings(), vec!["project:read".to_string()]);
    }

    #[test]
    fn parses_role_and_permission_strings() {
        assert_eq!("chef_projet".parse::<UserRole>().unwrap(), UserRole::ChefProjet);
        assert_eq!("task:assign".parse::<Permission>().unwrap(), Permission::TaskAssign);
        assert!("janitor".parse::<UserRole>().is_err());
    }

    #[test]
    fn default_role_is_technicien() {
        assert_eq!(UserRole::default(), UserRole::Technicien);
    }
}
