// Summary: Anchor program implementing NFT-collateralized listings: loans,
// call options and hires over a single mint, with custody held by a per
// (mint, owner) registry PDA acting as token delegate behind a Metaplex
// edition freeze. Interest and rental fees accrue pro rata in integer
// arithmetic; hire fees are prepaid into a program-signed escrow.
//
// NOTE: A loan and a hire may run against the same asset at once. A call
// option never shares the asset with anything.

use anchor_lang::prelude::*;

pub mod call_option;
pub mod custody;
pub mod hire;
pub mod interest;
pub mod loan;
pub mod royalty;
pub mod state;

use call_option::*;
use hire::*;
use loan::*;

declare_id!("8hSdpqHU7jz4C6C1kHUPQNMqBcC76n1BFXbHaTwd9X4c");

pub const SECONDS_PER_YEAR: i64 = 31_536_000;
pub const SECONDS_PER_DAY: i64 = 86_400;

#[program]
pub mod relic_listings {
    use super::*;

    pub fn init_loan(
        ctx: Context<InitLoan>,
        amount: u64,
        basis_points: u32,
        duration: i64,
    ) -> Result<()> {
        loan::handle_init_loan(ctx, amount, basis_points, duration)
    }

    pub fn init_loan_with_hire(
        ctx: Context<InitLoanWithHire>,
        amount: u64,
        basis_points: u32,
        duration: i64,
    ) -> Result<()> {
        loan::handle_init_loan_with_hire(ctx, amount, basis_points, duration)
    }

    pub fn give_loan(ctx: Context<GiveLoan>) -> Result<()> {
        loan::handle_give_loan(ctx)
    }

    pub fn repay_loan(ctx: Context<RepayLoan>) -> Result<()> {
        loan::handle_repay_loan(ctx)
    }

    pub fn repossess(ctx: Context<Repossess>) -> Result<()> {
        loan::handle_repossess(ctx)
    }

    pub fn repossess_with_hire(ctx: Context<RepossessWithHire>) -> Result<()> {
        loan::handle_repossess_with_hire(ctx)
    }

    pub fn close_loan(ctx: Context<CloseLoan>) -> Result<()> {
        loan::handle_close_loan(ctx)
    }

    pub fn init_call_option(
        ctx: Context<InitCallOption>,
        amount: u64,
        strike_price: u64,
        expiry: i64,
    ) -> Result<()> {
        call_option::handle_init_call_option(ctx, amount, strike_price, expiry)
    }

    pub fn buy_call_option(ctx: Context<BuyCallOption>) -> Result<()> {
        call_option::handle_buy_call_option(ctx)
    }

    pub fn exercise_call_option<'info>(
        ctx: Context<'_, '_, '_, 'info, ExerciseCallOption<'info>>,
    ) -> Result<()> {
        call_option::handle_exercise_call_option(ctx)
    }

    pub fn close_call_option(ctx: Context<CloseCallOption>) -> Result<()> {
        call_option::handle_close_call_option(ctx)
    }

    pub fn init_hire(ctx: Context<InitHire>, args: HireArgs) -> Result<()> {
        hire::handle_init_hire(ctx, args)
    }

    pub fn take_hire(ctx: Context<TakeHire>, days: u16) -> Result<()> {
        hire::handle_take_hire(ctx, days)
    }

    pub fn extend_hire(ctx: Context<ExtendHire>, days: u16) -> Result<()> {
        hire::handle_extend_hire(ctx, days)
    }

    pub fn recover_hire(ctx: Context<RecoverHire>) -> Result<()> {
        hire::handle_recover_hire(ctx)
    }

    pub fn withdraw_from_hire_escrow(ctx: Context<WithdrawFromHireEscrow>) -> Result<()> {
        hire::handle_withdraw_from_hire_escrow(ctx)
    }

    pub fn close_hire(ctx: Context<CloseHire>) -> Result<()> {
        hire::handle_close_hire(ctx)
    }
}
