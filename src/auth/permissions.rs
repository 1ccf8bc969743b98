// src/auth/permissions.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Analyst,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Analyst => "analyst",
            Role::Viewer => "viewer",
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Admin => &[
                ReadData,
                WriteData,
                DeleteData,
                ReadCollectors,
                WriteCollectors,
                ExecuteCollectors,
                ReadReports,
                WriteReports,
                ShareReports,
                ReadUsers,
                WriteUsers,
                AdminUsers,
                ReadSystem,
                WriteSystem,
                AdminSystem,
            ],
            Role::Manager => &[
                ReadData,
                WriteData,
                ReadCollectors,
                WriteCollectors,
                ExecuteCollectors,
                ReadReports,
                WriteReports,
                ShareReports,
                ReadUsers,
                WriteUsers,
            ],
            Role::Analyst => &[
                ReadData,
                ReadCollectors,
                ExecuteCollectors,
                ReadReports,
                WriteReports,
            ],
            Role::Viewer => &[ReadData, ReadCollectors, ReadReports],
        }
    }

    pub fn can(&self, p: Permission) -> bool {
        self.permissions().contains(&p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "read:data")]
    ReadData,
    #[serde(rename = "write:data")]
    WriteData,
    #[serde(rename = "delete:data")]
    DeleteData,
    #[serde(rename = "read:collectors")]
    ReadCollectors,
    #[serde(rename = "write:collectors")]
    WriteCollectors,
    #[serde(rename = "execute:collectors")]
    ExecuteCollectors,
    #[serde(rename = "read:reports")]
    ReadReports,
    #[serde(rename = "write:reports")]
    WriteReports,
    #[serde(rename = "share:reports")]
    ShareReports,
    #[serde(rename = "read:users")]
    ReadUsers,
    #[serde(rename = "write:users")]
    WriteUsers,
    #[serde(rename = "admin:users")]
    AdminUsers,
    #[serde(rename = "read:system")]
    ReadSystem,
    #[serde(rename = "write:system")]
    WriteSystem,
    #[serde(rename = "admin:system")]
    AdminSystem,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadData => "read:data",
            Permission::WriteData => "write:data",
            Permission::DeleteData => "delete:data",
            Permission::ReadCollectors => "read:collectors",
            Permission::WriteCollectors => "write:collectors",
            Permission::ExecuteCollectors => "execute:collectors",
            Permission::ReadReports => "read:reports",
            Permission::WriteReports => "write:reports",
            Permission::ShareReports => "share:reports",
            Permission::ReadUsers => "read:users",
            Permission::WriteUsers => "write:users",
            Permission::AdminUsers => "admin:users",
            Permission::ReadSystem => "read:system",
            Permission::WriteSystem => "write:system",
            Permission::AdminSystem => "admin:system",
        }
    }
}
