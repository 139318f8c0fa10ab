//! Permission vocabulary.
//!
//! Permission names are an external contract: API layers and tests refer to them verbatim.
//! The enum is closed so a typo in a call site fails to compile instead of silently denying.

use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! permissions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A named capability that a role may grant.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Permission {
            $($variant),+
        }

        impl Permission {
            /// Every permission known to this build.
            pub const ALL: &'static [Permission] = &[$(Permission::$variant),+];

            /// Returns the wire name of this permission.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Permission::$variant => $name),+
                }
            }

            /// Looks up a permission by its wire name.
            ///
            /// Returns `None` for unknown names; callers deciding access must treat that as
            /// "not granted".
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Permission::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

permissions! {
    // user_management
    CreateUsers => "create_users",
    ViewAllUsers => "view_all_users",
    ModifyUserRoles => "modify_user_roles",
    SuspendActivateAccounts => "suspend_activate_accounts",
    // patient_records
    CreatePatientRecords => "create_patient_records",
    ViewAllPatients => "view_all_patients",
    ViewAssignedPatients => "view_assigned_patients",
    EditMedicalHistory => "edit_medical_history",
    ViewOwnRecord => "view_own_record",
    // appointments
    ViewAllAppointments => "view_all_appointments",
    ViewOwnAppointments => "view_own_appointments",
    ScheduleAnyDoctor => "schedule_any_doctor",
    ScheduleOwnAppointments => "schedule_own_appointments",
    CancelAnyAppointment => "cancel_any_appointment",
    CancelOwnAppointments => "cancel_own_appointments",
    MarkAppointmentComplete => "mark_appointment_complete",
    // system_management
    AccessSystemSettings => "access_system_settings",
    ViewSystemLogs => "view_system_logs",
    ConfigureNotifications => "configure_notifications",
    ExportImportData => "export_import_data",
    // laboratory
    CreateLabOrders => "create_lab_orders",
    ViewLabOrders => "view_lab_orders",
    ViewAllLabOrders => "view_all_lab_orders",
    EditLabOrders => "edit_lab_orders",
    CollectSpecimens => "collect_specimens",
    ReceiveSpecimens => "receive_specimens",
    UpdateLabOrderStatus => "update_lab_order_status",
    CancelLabOrders => "cancel_lab_orders",
    CreateLabResults => "create_lab_results",
    ViewLabResults => "view_lab_results",
    EditLabResults => "edit_lab_results",
    ValidateLabResults => "validate_lab_results",
    UploadLabReports => "upload_lab_reports",
    // prescriptions
    CreatePrescriptions => "create_prescriptions",
    SignPrescriptions => "sign_prescriptions",
    SendPrescriptions => "send_prescriptions",
    DispensePrescriptions => "dispense_prescriptions",
    ViewAllPrescriptions => "view_all_prescriptions",
    ViewAssignedPrescriptions => "view_assigned_prescriptions",
    // documents
    UploadDocuments => "upload_documents",
    ViewDocuments => "view_documents",
    EditDocuments => "edit_documents",
    ShareDocuments => "share_documents",
    ViewAllDocuments => "view_all_documents",
    // consultations
    CreateConsultations => "create_consultations",
    ViewAllConsultations => "view_all_consultations",
    EditConsultations => "edit_consultations",
}

impl Permission {
    /// Parses a permission name, failing for names outside the vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPermission`] if `name` is not a known permission.
    pub fn parse(name: &str) -> Result<Self, RegistryError> {
        Self::from_name(name).ok_or_else(|| RegistryError::UnknownPermission(name.to_owned()))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Permission {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Permission::parse(&name).map_err(serde::de::Error::custom)
    }
}

/// Grouping used to present the catalogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    UserManagement,
    PatientRecords,
    Appointments,
    SystemManagement,
    Laboratory,
    Prescriptions,
    Documents,
    Consultations,
}

impl PermissionCategory {
    /// Returns the wire name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserManagement => "user_management",
            Self::PatientRecords => "patient_records",
            Self::Appointments => "appointments",
            Self::SystemManagement => "system_management",
            Self::Laboratory => "laboratory",
            Self::Prescriptions => "prescriptions",
            Self::Documents => "documents",
            Self::Consultations => "consultations",
        }
    }
}

impl fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
